//! Per-host deployment orchestration: each host walks its own phase
//! sequence (scr-env, revision bookkeeping, schema work, ACL guard,
//! revision push) independently, so one host's failure never blocks or
//! half-applies another host's work.

use crate::acl_sql::{apply_pg_role_path, create_schema, guard_acls, pg_role_path};
use crate::error::{PgMakeSchemasError, Result};
use crate::migration::{find_migration_way, MigrationStep};
use crate::model::{ClusterDescr, Fragment, FragmentInfo, Host, HostsDescr, SchemaDescr};
use crate::receivers::Receivers;
use crate::revision_sql::RevisionSql;
use crate::scr_env::{clean_scr_env, scr_env};
use crate::verbose;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub reinstall: bool,
    pub reinstall_func: bool,
    pub cascade: bool,
    pub weak_guard_acls: bool,
    pub init: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub show_rev: bool,
    pub change_rev: bool,
    pub weak_guard_acls: bool,
    pub init: bool,
    pub rev: Option<String>,
}

fn raw_fragment(sql: String) -> Fragment {
    Fragment { sql, info: FragmentInfo::default() }
}

fn exec_raw(receivers: &mut Receivers, host_name: &str, sql: String) -> Result<()> {
    receivers.execute(host_name, &raw_fragment(sql))
}

fn required_revision(cluster: &ClusterDescr) -> Result<&str> {
    cluster.revision.as_deref().ok_or_else(|| PgMakeSchemasError::config("cluster has no revision to push"))
}

/// Runs a `FragmentSet`'s already-read fragments through the role/path
/// preamble and the receiver sink, logging the script kind once at info
/// level and each fragment's routing at debug level.
fn exec_fragments(
    receivers: &mut Receivers,
    host_name: &str,
    script_type: &str,
    fragments: &[Fragment],
    role: Option<&str>,
    schema: Option<&str>,
) -> Result<()> {
    for (i, fragment) in fragments.iter().enumerate() {
        if i == 0 {
            verbose::execute_sql(host_name, script_type, receivers.look_fragment_i(host_name), None);
        }
        let wrapped = Fragment { sql: apply_pg_role_path(&fragment.sql, role, schema), info: fragment.info.clone() };
        verbose::execute_sql(host_name, script_type, receivers.look_fragment_i(host_name), Some(&wrapped));
        receivers.execute(host_name, &wrapped)?;
    }
    Ok(())
}

/// Resets the role/search-path, creates one schema, then runs its own SQL
/// fragments scoped to its owner and name.
fn install_one_schema(receivers: &mut Receivers, host_name: &str, schema: &SchemaDescr, script_type: &str) -> Result<()> {
    exec_raw(receivers, host_name, pg_role_path(None, None))?;
    verbose::create_schema(host_name, &schema.schema_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, create_schema(&schema.schema_name, &schema.owner, schema.grant_list.as_deref()))?;

    let fragments = schema.fragments.read_sql()?;
    exec_fragments(receivers, host_name, script_type, &fragments, Some(&schema.owner), Some(&schema.schema_name))
}

fn guard_acls_for(receivers: &mut Receivers, host_name: &str, schema: &SchemaDescr, weak: bool) -> Result<()> {
    verbose::guard_acls(host_name, &schema.schema_name, weak, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, guard_acls(&schema.schema_name, &schema.owner, schema.grant_list.as_deref(), weak))
}

fn report_failures(mut failures: Vec<(String, PgMakeSchemasError)>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let (host_name, first) = failures.remove(0);
    Err(PgMakeSchemasError::receivers(host_name, "<host phase>", first))
}

fn print_revision(host_name: &str, host_type: &str, var_rev: Option<&str>, var_com: Option<&str>, func_rev: Option<&str>, func_com: Option<&str>) {
    println!("{host_name} ({host_type}): var revision {var_rev:?} (comment {var_com:?}), func revision {func_rev:?} (comment {func_com:?})");
}

fn print_migr_way(host_name: &str, host_type: &str, migr_list: Option<&[MigrationStep]>) {
    match migr_list {
        Some(steps) if steps.is_empty() => println!("{host_name} ({host_type}): already at target revision"),
        Some(steps) => println!("{host_name} ({host_type}): migration path {steps:?}"),
        None => println!("{host_name} ({host_type}): no migration path found"),
    }
}

// ---------------------------------------------------------------------
// init
// ---------------------------------------------------------------------

/// Runs only the init-SQL phase, framed by scr-env and revision-structure
/// creation.
pub fn run_init(cluster: &ClusterDescr, hosts: &HostsDescr, receivers: &mut Receivers) -> Result<()> {
    verbose::prepare_init();
    verbose::source_code_revision(&cluster.application, cluster.revision.as_deref(), None);

    let rev_sql = RevisionSql::new(cluster.application.clone());
    let mut failures = Vec::new();

    for host in &hosts.host_list {
        let host_type = host.host_type.clone();
        let outcome: Result<()> = (|| {
            receivers.begin_host(host)?;
            verbose::begin_host(&host.name);

            exec_raw(receivers, &host.name, pg_role_path(None, None))?;
            verbose::scr_env(&host.name, receivers.look_fragment_i(&host.name));
            exec_raw(receivers, &host.name, scr_env(hosts, &host.name))?;
            verbose::ensure_revision_structs(&host.name, receivers.look_fragment_i(&host.name));
            exec_raw(receivers, &host.name, rev_sql.ensure_revision_structs(&host_type))?;

            if let Some(init) = cluster.init_fragments(&host_type) {
                let fragments = init.fragments.read_sql()?;
                exec_fragments(receivers, &host.name, "init_sql", &fragments, None, None)?;
            }

            verbose::clean_scr_env(&host.name, receivers.look_fragment_i(&host.name));
            exec_raw(receivers, &host.name, clean_scr_env())?;

            receivers.finish_host(&host.name)?;
            verbose::finish_host(&host.name);
            Ok(())
        })();

        if let Err(e) = outcome {
            tracing::error!(host_name = %host.name, error = %e, "init failed for host");
            failures.push((host.name.clone(), e));
        }
    }

    receivers.close();
    report_failures(failures)
}

// ---------------------------------------------------------------------
// install
// ---------------------------------------------------------------------

fn install_host(
    rev_sql: &RevisionSql,
    cluster: &ClusterDescr,
    settings_clusters: &[ClusterDescr],
    hosts: &HostsDescr,
    host: &Host,
    opts: &InstallOptions,
    comment: Option<&str>,
    receivers: &mut Receivers,
) -> Result<()> {
    let host_name = host.name.as_str();
    let host_type = host.host_type.as_str();
    let schemas_type = host_type;

    let var_schemas = cluster.var_schema_names(host_type);
    let func_schemas = cluster.func_schema_names(host_type);

    exec_raw(receivers, host_name, pg_role_path(None, None))?;
    verbose::scr_env(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, scr_env(hosts, host_name))?;
    verbose::ensure_revision_structs(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.ensure_revision_structs(host_type))?;

    if opts.reinstall {
        if !opts.reinstall_func {
            verbose::drop_var_schemas(host_name, opts.cascade, receivers.look_fragment_i(host_name));
            exec_raw(receivers, host_name, rev_sql.drop_var_schemas(host_type, schemas_type, &var_schemas, opts.cascade))?;
        }
        verbose::drop_func_schemas(host_name, opts.cascade, receivers.look_fragment_i(host_name));
        exec_raw(receivers, host_name, rev_sql.drop_func_schemas(host_type, schemas_type, &func_schemas, opts.cascade))?;

        if !opts.reinstall_func {
            verbose::clean_var_revision(host_name, receivers.look_fragment_i(host_name));
            exec_raw(receivers, host_name, rev_sql.clean_var_revision(host_type, schemas_type))?;
        }
        verbose::clean_func_revision(host_name, receivers.look_fragment_i(host_name));
        exec_raw(receivers, host_name, rev_sql.clean_func_revision(host_type, schemas_type))?;
    }

    if !opts.reinstall_func {
        verbose::guard_var_revision(host_name, None, receivers.look_fragment_i(host_name));
        exec_raw(receivers, host_name, rev_sql.guard_var_revision(host_type, schemas_type, None))?;
    }
    verbose::guard_func_revision(host_name, None, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.guard_func_revision(host_type, schemas_type, None))?;

    if opts.init {
        if let Some(init) = cluster.init_fragments(host_type) {
            let fragments = init.fragments.read_sql()?;
            exec_fragments(receivers, host_name, "init_sql", &fragments, None, None)?;
        }
    }

    if !opts.reinstall_func {
        if let Some(schemas) = cluster.schemas_for(host_type) {
            for schema in &schemas.var_schema_list {
                install_one_schema(receivers, host_name, schema, "var_install_sql")?;
            }
        }
        if let Some(late) = cluster.late_fragments(host_type) {
            let fragments = late.fragments.read_sql()?;
            exec_fragments(receivers, host_name, "late_install_sql", &fragments, None, None)?;
        }
    }

    for settings_cluster in settings_clusters {
        if let Some(settings) = settings_cluster.settings_for(host_type) {
            let fragments = settings.fragments.read_sql()?;
            exec_fragments(receivers, host_name, "settings_sql", &fragments, None, None)?;
        }
    }

    if let Some(schemas) = cluster.schemas_for(host_type) {
        for schema in &schemas.func_schema_list {
            install_one_schema(receivers, host_name, schema, "func_install_sql")?;
        }
    }

    if let Some(safeguard) = cluster.safeguard_fragments(host_type) {
        let fragments = safeguard.fragments.read_sql()?;
        exec_fragments(receivers, host_name, "safeguard_sql", &fragments, None, None)?;
    }

    exec_raw(receivers, host_name, pg_role_path(None, None))?;

    if let Some(schemas) = cluster.schemas_for(host_type) {
        if !opts.reinstall_func {
            for schema in &schemas.var_schema_list {
                guard_acls_for(receivers, host_name, schema, opts.weak_guard_acls)?;
            }
        }
        for schema in &schemas.func_schema_list {
            guard_acls_for(receivers, host_name, schema, opts.weak_guard_acls)?;
        }
    }

    let revision = required_revision(cluster)?;
    if !opts.reinstall_func {
        verbose::push_var_revision(host_name, revision, comment, receivers.look_fragment_i(host_name));
        exec_raw(receivers, host_name, rev_sql.push_var_revision(host_type, schemas_type, revision, comment, &var_schemas))?;
    }
    verbose::push_func_revision(host_name, revision, comment, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.push_func_revision(host_type, schemas_type, revision, comment, &func_schemas))?;

    verbose::clean_scr_env(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, clean_scr_env())?;

    Ok(())
}

pub fn run_install(
    cluster: &ClusterDescr,
    settings_clusters: &[ClusterDescr],
    hosts: &HostsDescr,
    opts: &InstallOptions,
    comment: Option<&str>,
    receivers: &mut Receivers,
) -> Result<()> {
    if opts.reinstall && !opts.reinstall_func && !opts.cascade {
        return Err(PgMakeSchemasError::config("unable to reinstall variable schemas without cascaded dropping"));
    }

    verbose::prepare_install();
    verbose::source_code_revision(&cluster.application, cluster.revision.as_deref(), comment);

    let rev_sql = RevisionSql::new(cluster.application.clone());
    let mut failures = Vec::new();

    for host in &hosts.host_list {
        let outcome: Result<()> = (|| {
            receivers.begin_host(host)?;
            verbose::begin_host(&host.name);
            install_host(&rev_sql, cluster, settings_clusters, hosts, host, opts, comment, receivers)?;
            receivers.finish_host(&host.name)?;
            verbose::finish_host(&host.name);
            Ok(())
        })();

        if let Err(e) = outcome {
            tracing::error!(host_name = %host.name, error = %e, "install failed for host");
            failures.push((host.name.clone(), e));
        }
    }

    receivers.close();
    report_failures(failures)
}

// ---------------------------------------------------------------------
// upgrade
// ---------------------------------------------------------------------

fn apply_upgrade_step(
    receivers: &mut Receivers,
    host_name: &str,
    cluster: &ClusterDescr,
    settings_clusters: &[ClusterDescr],
    host_type: &str,
    step: &MigrationStep,
) -> Result<()> {
    if let Some(upgrade) = cluster.upgrade_for_step(host_type, step)? {
        let fragments = upgrade.fragments.read_sql()?;
        exec_fragments(receivers, host_name, "upgrade_sql", &fragments, None, None)?;
    }

    for settings_cluster in settings_clusters {
        if let Some(upgrade) = settings_cluster.upgrade_for_step(host_type, step)? {
            let fragments = upgrade.fragments.read_sql()?;
            exec_fragments(receivers, host_name, "settings_upgrade_sql", &fragments, None, None)?;
        }
    }

    Ok(())
}

fn upgrade_host(
    rev_sql: &RevisionSql,
    cluster: &ClusterDescr,
    settings_clusters: &[ClusterDescr],
    hosts: &HostsDescr,
    host: &Host,
    opts: &UpgradeOptions,
    comment: Option<&str>,
    receivers: &mut Receivers,
) -> Result<()> {
    let host_name = host.name.as_str();
    let host_type = host.host_type.as_str();
    let schemas_type = host_type;

    exec_raw(receivers, host_name, pg_role_path(None, None))?;
    verbose::scr_env(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, scr_env(hosts, host_name))?;
    verbose::ensure_revision_structs(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.ensure_revision_structs(host_type))?;

    let host_var_rev = if let Some(rev) = &opts.rev {
        Some(rev.clone())
    } else {
        let client = receivers
            .client_mut(host_name)
            .ok_or_else(|| PgMakeSchemasError::config(format!("{host_name:?}: upgrade requires --execute to read the current revision")))?;

        let (var_rev, var_com) = rev_sql
            .fetch_var_revision(client, host_type, schemas_type)
            .map_err(|e| PgMakeSchemasError::receivers(host_name.to_string(), "<fetch_var_revision>", e))?;
        let (func_rev, func_com) = rev_sql
            .fetch_func_revision(client, host_type, schemas_type)
            .map_err(|e| PgMakeSchemasError::receivers(host_name.to_string(), "<fetch_func_revision>", e))?;

        print_revision(host_name, host_type, var_rev.as_deref(), var_com.as_deref(), func_rev.as_deref(), func_com.as_deref());
        var_rev
    };

    let migr_list = find_migration_way(cluster, host_var_rev.as_deref())?;
    print_migr_way(host_name, host_type, migr_list.as_deref());

    verbose::guard_var_revision(host_name, host_var_rev.as_deref(), receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.guard_var_revision(host_type, schemas_type, host_var_rev.as_deref()))?;

    if opts.show_rev {
        return Ok(());
    }

    if !opts.change_rev {
        let func_schemas = cluster.func_schema_names(host_type);
        verbose::drop_func_schemas(host_name, false, receivers.look_fragment_i(host_name));
        exec_raw(receivers, host_name, rev_sql.drop_func_schemas(host_type, schemas_type, &func_schemas, false))?;
    }

    verbose::arch_var_revision(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.arch_var_revision(host_type, schemas_type))?;
    verbose::arch_func_revision(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.arch_func_revision(host_type, schemas_type))?;

    if !opts.change_rev {
        let Some(migr_list) = migr_list else {
            return Err(PgMakeSchemasError::migration(format!("{host_name:?}: there is no way to do migration")));
        };

        if opts.init {
            if let Some(init) = cluster.init_fragments(host_type) {
                let fragments = init.fragments.read_sql()?;
                exec_fragments(receivers, host_name, "init_sql", &fragments, None, None)?;
            }
        }

        let split_at = migr_list.len().saturating_sub(1);
        let (interm_steps, final_step) = migr_list.split_at(split_at);

        for step in interm_steps {
            apply_upgrade_step(receivers, host_name, cluster, settings_clusters, host_type, step)?;

            verbose::push_var_revision(host_name, &step.0, None, receivers.look_fragment_i(host_name));
            exec_raw(receivers, host_name, rev_sql.push_var_revision(host_type, schemas_type, &step.0, None, &[]))?;
            verbose::arch_var_revision(host_name, receivers.look_fragment_i(host_name));
            exec_raw(receivers, host_name, rev_sql.arch_var_revision(host_type, schemas_type))?;
        }

        if let Some(step) = final_step.first() {
            apply_upgrade_step(receivers, host_name, cluster, settings_clusters, host_type, step)?;
        }

        if let Some(schemas) = cluster.schemas_for(host_type) {
            for schema in &schemas.func_schema_list {
                install_one_schema(receivers, host_name, schema, "func_install_sql")?;
            }
        }
    }

    if let Some(safeguard) = cluster.safeguard_fragments(host_type) {
        let fragments = safeguard.fragments.read_sql()?;
        exec_fragments(receivers, host_name, "safeguard_sql", &fragments, None, None)?;
    }

    exec_raw(receivers, host_name, pg_role_path(None, None))?;

    if let Some(schemas) = cluster.schemas_for(host_type) {
        for schema in &schemas.var_schema_list {
            guard_acls_for(receivers, host_name, schema, opts.weak_guard_acls)?;
        }
        for schema in &schemas.func_schema_list {
            guard_acls_for(receivers, host_name, schema, opts.weak_guard_acls)?;
        }
    }

    let var_schemas = cluster.var_schema_names(host_type);
    let func_schemas = cluster.func_schema_names(host_type);
    let revision = required_revision(cluster)?;

    verbose::push_var_revision(host_name, revision, comment, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.push_var_revision(host_type, schemas_type, revision, comment, &var_schemas))?;
    verbose::push_func_revision(host_name, revision, comment, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, rev_sql.push_func_revision(host_type, schemas_type, revision, comment, &func_schemas))?;

    verbose::clean_scr_env(host_name, receivers.look_fragment_i(host_name));
    exec_raw(receivers, host_name, clean_scr_env())?;

    Ok(())
}

pub fn run_upgrade(
    cluster: &ClusterDescr,
    settings_clusters: &[ClusterDescr],
    hosts: &HostsDescr,
    opts: &UpgradeOptions,
    comment: Option<&str>,
    receivers: &mut Receivers,
) -> Result<()> {
    verbose::prepare_upgrade();
    verbose::source_code_revision(&cluster.application, cluster.revision.as_deref(), comment);

    let rev_sql = RevisionSql::new(cluster.application.clone());
    let mut failures = Vec::new();

    for host in &hosts.host_list {
        let outcome: Result<()> = (|| {
            receivers.begin_host(host)?;
            verbose::begin_host(&host.name);
            upgrade_host(&rev_sql, cluster, settings_clusters, hosts, host, opts, comment, receivers)?;
            receivers.finish_host(&host.name)?;
            verbose::finish_host(&host.name);
            Ok(())
        })();

        if let Err(e) = outcome {
            tracing::error!(host_name = %host.name, error = %e, "upgrade failed for host");
            failures.push((host.name.clone(), e));
        }
    }

    receivers.close();
    report_failures(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterDescr, Host, HostsDescr, SchemasDescr};

    fn empty_cluster(revision: &str) -> ClusterDescr {
        ClusterDescr {
            application: "app".into(),
            cluster_type: None,
            revision: Some(revision.to_string()),
            compatible_list: vec![],
            schemas_list: vec![SchemasDescr { schemas_type: "main".into(), ..Default::default() }],
            settings_list: vec![],
            migrations: None,
        }
    }

    fn pseudo_hosts() -> HostsDescr {
        HostsDescr { host_list: vec![Host { name: "main".into(), host_type: "main".into(), conninfo: None, params: None }], shared: None }
    }

    #[test]
    fn run_install_in_output_only_mode_writes_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out").to_string_lossy().to_string();

        let cluster = empty_cluster("r1");
        let hosts = pseudo_hosts();
        let mut receivers = Receivers::new(false, false, Some(prefix.clone()));

        run_install(&cluster, &[], &hosts, &InstallOptions::default(), None, &mut receivers).unwrap();

        let content = std::fs::read_to_string(format!("{prefix}.main.main.sql")).unwrap();
        assert!(content.contains("create schema if not exists"));
        assert!(content.contains("with upsert as"));
    }

    #[test]
    fn run_init_only_runs_scr_env_and_revision_structs() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out").to_string_lossy().to_string();

        let cluster = empty_cluster("r1");
        let hosts = pseudo_hosts();
        let mut receivers = Receivers::new(false, false, Some(prefix.clone()));

        run_init(&cluster, &hosts, &mut receivers).unwrap();

        let content = std::fs::read_to_string(format!("{prefix}.main.main.sql")).unwrap();
        assert!(content.contains("scr_env_host_name"));
        assert!(!content.contains("with upsert as"));
    }

    #[test]
    fn reinstall_without_cascade_or_func_only_is_rejected() {
        let cluster = empty_cluster("r1");
        let hosts = pseudo_hosts();
        let mut receivers = Receivers::default();
        let opts = InstallOptions { reinstall: true, reinstall_func: false, cascade: false, ..Default::default() };

        let err = run_install(&cluster, &[], &hosts, &opts, None, &mut receivers).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn upgrade_without_rev_and_without_execute_fails_per_host() {
        let cluster = empty_cluster("r1");
        let hosts = pseudo_hosts();
        let mut receivers = Receivers::new(false, false, None);
        let opts = UpgradeOptions::default();

        let err = run_upgrade(&cluster, &[], &hosts, &opts, None, &mut receivers).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Receivers);
    }

    #[test]
    fn upgrade_with_explicit_rev_at_target_skips_migration() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out").to_string_lossy().to_string();

        let cluster = empty_cluster("r1");
        let hosts = pseudo_hosts();
        let mut receivers = Receivers::new(false, false, Some(prefix.clone()));
        let opts = UpgradeOptions { rev: Some("r1".into()), ..Default::default() };

        run_upgrade(&cluster, &[], &hosts, &opts, None, &mut receivers).unwrap();

        let content = std::fs::read_to_string(format!("{prefix}.main.main.sql")).unwrap();
        assert!(content.contains("with upsert as"));
    }
}
