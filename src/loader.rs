//! Recursive manifest loader: one function per descriptor tag, each reading
//! its YAML document, validating it, and recursing into child directories
//! through a shared `LoadCtx` rather than a subclass-hook hierarchy.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PgMakeSchemasError, Result};
use crate::fragment::{compose_fragments, StringOrList};
use crate::model::*;
use crate::path_guard;

pub const CLUSTER_FILE: &str = "cluster.yaml";
pub const SCHEMAS_FILE: &str = "schemas.yaml";
pub const SCHEMA_FILE: &str = "schema.yaml";
pub const INIT_FILE: &str = "init.yaml";
pub const LATE_FILE: &str = "late.yaml";
pub const SAFEGUARD_FILE: &str = "safeguard.yaml";
pub const SETTINGS_FILE: &str = "settings.yaml";
pub const MIGRATIONS_FILE: &str = "migrations.yaml";
pub const MIGRATION_FILE: &str = "migration.yaml";
pub const UPGRADE_FILE: &str = "upgrade.yaml";

/// Shared, read-only context threaded through every `load_*` call: the
/// allow-listed directories a fragment may be read from, and the
/// `$NAME`/`${NAME}` include-reference table.
#[derive(Debug, Clone)]
pub struct LoadCtx {
    pub allow_list: Vec<PathBuf>,
    pub include_ref_map: HashMap<String, PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawFragmentBody {
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
    sql: Option<String>,
}

fn sql_filter(path: &Path) -> bool {
    path.extension().map(|e| e == "sql").unwrap_or(false)
}

fn load_fragment_set(
    manifest_path: &Path,
    ctx: &LoadCtx,
    body: &RawFragmentBody,
) -> Result<FragmentSet> {
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));

    let include = body.include.clone().into_vec();
    let first = body.first.clone().into_vec();
    let last = body.last.clone().into_vec();

    let lists = compose_fragments(base_dir, &include, &first, &last, &ctx.include_ref_map, sql_filter)?;

    let relative_to = ctx.allow_list.last().cloned().unwrap_or_else(|| base_dir.to_path_buf());

    Ok(FragmentSet {
        first: lists.first,
        regular: lists.regular,
        last: lists.last,
        inline: body.sql.clone(),
        relative_to,
        manifest_path: manifest_path.to_path_buf(),
        allow_list: ctx.allow_list.clone(),
    })
}

/// Parses `content` as a one-key YAML mapping `{tag: <body>}` and
/// deserializes the body into `T`. A missing body is treated as an empty
/// mapping (matching `init_elem = doc['init']; if init_elem is None: ...`).
fn parse_tagged_doc<T: for<'de> Deserialize<'de> + Default>(
    path: &Path,
    content: &str,
    tag: &str,
) -> Result<T> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|source| PgMakeSchemasError::Yaml { path: path.to_path_buf(), source })?;

    let serde_yaml::Value::Mapping(mapping) = doc else {
        return Err(PgMakeSchemasError::manifest(path, "document is not a mapping"));
    };

    if mapping.len() != 1 {
        return Err(PgMakeSchemasError::manifest(path, "expected exactly one top-level key"));
    }

    let (key, value) = mapping.into_iter().next().unwrap();
    let key = key
        .as_str()
        .ok_or_else(|| PgMakeSchemasError::manifest(path, "top-level key is not a string"))?;

    if key != tag {
        return Err(PgMakeSchemasError::manifest(path, format!("expected top-level key {tag:?}, found {key:?}")));
    }

    if value.is_null() {
        return Ok(T::default());
    }

    serde_yaml::from_value(value).map_err(|source| PgMakeSchemasError::Yaml { path: path.to_path_buf(), source })
}

fn read_manifest(path: &Path, ctx: &LoadCtx) -> Result<String> {
    path_guard::read_to_string_safely(path, &ctx.allow_list)
}

// ---------------------------------------------------------------------
// init / late / safeguard — identical shape, only the tag differs.
// ---------------------------------------------------------------------

pub fn load_init(path: &Path, ctx: &LoadCtx) -> Result<InitDescr> {
    let content = read_manifest(path, ctx)?;
    let body: RawFragmentBody = parse_tagged_doc(path, &content, "init")?;
    Ok(InitDescr { fragments: load_fragment_set(path, ctx, &body)? })
}

pub fn load_late(path: &Path, ctx: &LoadCtx) -> Result<LateDescr> {
    let content = read_manifest(path, ctx)?;
    let body: RawFragmentBody = parse_tagged_doc(path, &content, "late")?;
    Ok(LateDescr { fragments: load_fragment_set(path, ctx, &body)? })
}

pub fn load_safeguard(path: &Path, ctx: &LoadCtx) -> Result<SafeguardDescr> {
    let content = read_manifest(path, ctx)?;
    let body: RawFragmentBody = parse_tagged_doc(path, &content, "safeguard")?;
    Ok(SafeguardDescr { fragments: load_fragment_set(path, ctx, &body)? })
}

// ---------------------------------------------------------------------
// schema
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawSchema {
    name: Option<String>,
    #[serde(rename = "type")]
    schema_type: Option<String>,
    owner: Option<String>,
    grant: StringOrList,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
    sql: Option<String>,
}

pub fn load_schema(path: &Path, ctx: &LoadCtx) -> Result<SchemaDescr> {
    let content = read_manifest(path, ctx)?;
    let raw: RawSchema = parse_tagged_doc(path, &content, "schema")?;

    let schema_name = raw.name.ok_or_else(|| PgMakeSchemasError::manifest(path, "schema.name is required"))?;
    let schema_type_str =
        raw.schema_type.ok_or_else(|| PgMakeSchemasError::manifest(path, "schema.type is required"))?;
    let owner = raw.owner.ok_or_else(|| PgMakeSchemasError::manifest(path, "schema.owner is required"))?;

    let schema_type = match schema_type_str.as_str() {
        "var" => SchemaType::Var,
        "func" => SchemaType::Func,
        other => {
            return Err(PgMakeSchemasError::manifest(path, format!("unknown schema type {other:?}")));
        }
    };

    let grant_list = match &raw.grant {
        StringOrList::None_ => None,
        other => Some(other.clone().into_vec()),
    };

    let body = RawFragmentBody {
        include: raw.include,
        first: raw.first,
        last: raw.last,
        sql: raw.sql,
    };

    Ok(SchemaDescr {
        schema_name,
        schema_type,
        owner,
        grant_list,
        fragments: load_fragment_set(path, ctx, &body)?,
    })
}

// ---------------------------------------------------------------------
// settings
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawSettings {
    #[serde(rename = "type")]
    settings_type: Option<String>,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
    sql: Option<String>,
}

pub fn load_settings(path: &Path, ctx: &LoadCtx, default_type: Option<&str>) -> Result<SettingsDescr> {
    let content = read_manifest(path, ctx)?;
    let raw: RawSettings = parse_tagged_doc(path, &content, "settings")?;

    let settings_type = raw
        .settings_type
        .or_else(|| default_type.map(str::to_string))
        .ok_or_else(|| PgMakeSchemasError::manifest(path, "settings.type is required"))?;

    let body = RawFragmentBody { include: raw.include, first: raw.first, last: raw.last, sql: raw.sql };

    Ok(SettingsDescr { settings_type, fragments: load_fragment_set(path, ctx, &body)? })
}

// ---------------------------------------------------------------------
// upgrade
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawUpgrade {
    #[serde(rename = "type")]
    upgrade_type: Option<String>,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
    sql: Option<String>,
}

pub fn load_upgrade(path: &Path, ctx: &LoadCtx) -> Result<UpgradeDescr> {
    let content = read_manifest(path, ctx)?;
    let raw: RawUpgrade = parse_tagged_doc(path, &content, "upgrade")?;
    load_upgrade_from_raw(path, ctx, raw)
}

fn load_upgrade_from_raw(path: &Path, ctx: &LoadCtx, raw: RawUpgrade) -> Result<UpgradeDescr> {
    let upgrade_type =
        raw.upgrade_type.ok_or_else(|| PgMakeSchemasError::manifest(path, "upgrade.type is required"))?;

    let body = RawFragmentBody { include: raw.include, first: raw.first, last: raw.last, sql: raw.sql };

    Ok(UpgradeDescr { upgrade_type, fragments: load_fragment_set(path, ctx, &body)? })
}

/// Synthesizes an `UpgradeDescr` inline, without touching the filesystem
/// for a separate `upgrade.yaml` — used when a `migration.yaml` declares
/// `type`+`sql` directly instead of pointing at sibling upgrade directories.
fn load_virtual_upgrade(migration_path: &Path, ctx: &LoadCtx, raw: &RawMigration) -> Result<UpgradeDescr> {
    let upgrade_type = raw
        .migration_type
        .clone()
        .ok_or_else(|| PgMakeSchemasError::manifest(migration_path, "migration.type is required for an inline upgrade"))?;

    let body = RawFragmentBody {
        include: raw.include.clone(),
        first: raw.first.clone(),
        last: raw.last.clone(),
        sql: raw.sql.clone(),
    };

    Ok(UpgradeDescr { upgrade_type, fragments: load_fragment_set(migration_path, ctx, &body)? })
}

// ---------------------------------------------------------------------
// migration / migrations
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawMigration {
    #[serde(rename = "type")]
    migration_type: Option<String>,
    revision: Option<String>,
    compatible: StringOrList,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
    sql: Option<String>,
}

pub fn load_migration(path: &Path, ctx: &LoadCtx, default_type: Option<&str>) -> Result<MigrationDescr> {
    let content = read_manifest(path, ctx)?;
    let mut raw: RawMigration = parse_tagged_doc(path, &content, "migration")?;
    if raw.migration_type.is_none() {
        raw.migration_type = default_type.map(str::to_string);
    }

    let revision = raw.revision.clone().ok_or_else(|| PgMakeSchemasError::manifest(path, "migration.revision is required"))?;
    let compatible_list = raw.compatible.clone().into_vec();
    if compatible_list.is_empty() {
        return Err(PgMakeSchemasError::manifest(path, "migration.compatible is required"));
    }

    // A `migration.yaml` that declares `type` (and optionally `sql`) is
    // treated as a single inline upgrade; otherwise its sibling
    // directories are walked for `upgrade.yaml` files.
    let upgrade_list = if raw.migration_type.is_some() {
        vec![load_virtual_upgrade(path, ctx, &raw)?]
    } else {
        load_upgrade_children(path, ctx, &raw)?
    };

    Ok(MigrationDescr { revision, compatible_list, upgrade_list })
}

fn load_upgrade_children(migration_path: &Path, ctx: &LoadCtx, raw: &RawMigration) -> Result<Vec<UpgradeDescr>> {
    let base_dir = migration_path.parent().unwrap_or(Path::new("."));
    let include = raw.include.clone().into_vec();
    let first = raw.first.clone().into_vec();
    let last = raw.last.clone().into_vec();

    let dirs = find_children(base_dir, &include, &first, &last, ctx, UPGRADE_FILE)?;

    let mut upgrade_list = Vec::with_capacity(dirs.len());
    let mut seen_types = HashSet::new();

    for dir in dirs {
        let upgrade_path = dir.join(UPGRADE_FILE);
        let upgrade = load_upgrade(&upgrade_path, ctx)?;

        if !seen_types.insert(upgrade.upgrade_type.clone()) {
            return Err(PgMakeSchemasError::manifest(&upgrade_path, format!("non unique upgrade_type {:?}", upgrade.upgrade_type)));
        }

        upgrade_list.push(upgrade);
    }

    Ok(upgrade_list)
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawMigrations {
    #[serde(rename = "type")]
    migrations_type: Option<String>,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
}

pub fn load_migrations(path: &Path, ctx: &LoadCtx, default_type: Option<&str>) -> Result<MigrationsDescr> {
    let content = read_manifest(path, ctx)?;
    let raw: RawMigrations = parse_tagged_doc(path, &content, "migrations")?;
    let migrations_type = raw.migrations_type.or_else(|| default_type.map(str::to_string));

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let include = raw.include.into_vec();
    let first = raw.first.into_vec();
    let last = raw.last.into_vec();

    let dirs = find_children(base_dir, &include, &first, &last, ctx, MIGRATION_FILE)?;

    let mut migration_list = Vec::with_capacity(dirs.len());
    let mut migration_way_set: HashSet<(String, String)> = HashSet::new();

    for dir in dirs {
        let migration_path = dir.join(MIGRATION_FILE);
        let migration = load_migration(&migration_path, ctx, migrations_type.as_deref())?;

        for compatible in &migration.compatible_list {
            let way = (migration.revision.clone(), compatible.clone());
            if !migration_way_set.insert(way.clone()) {
                return Err(PgMakeSchemasError::manifest(
                    &migration_path,
                    format!("non unique migration_way {way:?}"),
                ));
            }
        }

        migration_list.push(migration);
    }

    Ok(MigrationsDescr { migration_list })
}

// ---------------------------------------------------------------------
// schemas
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawSchemas {
    #[serde(rename = "type")]
    schemas_type: Option<String>,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
}

pub fn load_schemas(path: &Path, ctx: &LoadCtx, default_type: Option<&str>) -> Result<SchemasDescr> {
    let content = read_manifest(path, ctx)?;
    let raw: RawSchemas = parse_tagged_doc(path, &content, "schemas")?;
    let schemas_type = raw
        .schemas_type
        .or_else(|| default_type.map(str::to_string))
        .ok_or_else(|| PgMakeSchemasError::manifest(path, "schemas.type is required"))?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let include = raw.include.into_vec();
    let first = raw.first.into_vec();
    let last = raw.last.into_vec();

    // A directory qualifies as a child if it directly contains any one of
    // the four child manifest files.
    let dirs = find_children_any(
        base_dir,
        &include,
        &first,
        &last,
        ctx,
        &[SCHEMA_FILE, INIT_FILE, LATE_FILE, SAFEGUARD_FILE],
    )?;

    let mut schemas = SchemasDescr { schemas_type, ..Default::default() };
    let mut schema_name_set = HashSet::new();

    for dir in dirs {
        if dir.join(INIT_FILE).is_file() {
            if schemas.init.is_some() {
                return Err(PgMakeSchemasError::manifest(&dir, "non unique init"));
            }
            schemas.init = Some(load_init(&dir.join(INIT_FILE), ctx)?);
        } else if dir.join(SCHEMA_FILE).is_file() {
            let schema_path = dir.join(SCHEMA_FILE);
            let schema = load_schema(&schema_path, ctx)?;

            if !schema_name_set.insert(schema.schema_name.clone()) {
                return Err(PgMakeSchemasError::manifest(&schema_path, format!("non unique schema_name {:?}", schema.schema_name)));
            }

            match schema.schema_type {
                SchemaType::Var => schemas.var_schema_list.push(schema),
                SchemaType::Func => schemas.func_schema_list.push(schema),
            }
        } else if dir.join(LATE_FILE).is_file() {
            if schemas.late.is_some() {
                return Err(PgMakeSchemasError::manifest(&dir, "non unique late"));
            }
            schemas.late = Some(load_late(&dir.join(LATE_FILE), ctx)?);
        } else if dir.join(SAFEGUARD_FILE).is_file() {
            if schemas.safeguard.is_some() {
                return Err(PgMakeSchemasError::manifest(&dir, "non unique safeguard"));
            }
            schemas.safeguard = Some(load_safeguard(&dir.join(SAFEGUARD_FILE), ctx)?);
        } else {
            unreachable!("find_children_any only returns directories matching one of the filter names");
        }
    }

    Ok(schemas)
}

// ---------------------------------------------------------------------
// cluster
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawCluster {
    application: Option<String>,
    #[serde(rename = "type")]
    cluster_type: Option<String>,
    revision: Option<String>,
    compatible: StringOrList,
    include: StringOrList,
    first: StringOrList,
    last: StringOrList,
}

pub fn load_cluster(
    path: &Path,
    ctx: &LoadCtx,
    default_type: Option<&str>,
    settings_mode: bool,
) -> Result<ClusterDescr> {
    let content = read_manifest(path, ctx)?;
    let raw: RawCluster = parse_tagged_doc(path, &content, "cluster")?;

    let application = raw.application.ok_or_else(|| PgMakeSchemasError::manifest(path, "cluster.application is required"))?;
    let cluster_type = raw.cluster_type.or_else(|| default_type.map(str::to_string));

    let (revision, compatible_list) = if settings_mode {
        let compatible_list = raw.compatible.into_vec();
        if compatible_list.is_empty() {
            return Err(PgMakeSchemasError::manifest(path, "cluster.compatible is required in settings mode"));
        }
        (None, compatible_list)
    } else {
        let revision = raw.revision.ok_or_else(|| PgMakeSchemasError::manifest(path, "cluster.revision is required"))?;
        (Some(revision), vec![])
    };

    let base_dir = path.parent().unwrap_or(Path::new("."));
    let include = raw.include.into_vec();
    let first = raw.first.into_vec();
    let last = raw.last.into_vec();

    let wanted: &[&str] =
        if settings_mode { &[SETTINGS_FILE, MIGRATIONS_FILE] } else { &[SCHEMAS_FILE, MIGRATIONS_FILE] };
    let dirs = find_children_any(base_dir, &include, &first, &last, ctx, wanted)?;

    let mut schemas_list = Vec::new();
    let mut settings_list = Vec::new();
    let mut migrations = None;
    let mut schemas_type_set = HashSet::new();
    let mut settings_type_set = HashSet::new();

    for dir in dirs {
        if !settings_mode && dir.join(SCHEMAS_FILE).is_file() {
            let schemas_path = dir.join(SCHEMAS_FILE);
            let schemas = load_schemas(&schemas_path, ctx, cluster_type.as_deref())?;

            if let Some(ct) = &cluster_type {
                if &schemas.schemas_type != ct {
                    return Err(PgMakeSchemasError::manifest(
                        &schemas_path,
                        format!("schemas_type {:?} is distinct from cluster_type {ct:?}", schemas.schemas_type),
                    ));
                }
            }

            if !schemas_type_set.insert(schemas.schemas_type.clone()) {
                return Err(PgMakeSchemasError::manifest(&schemas_path, format!("non unique schemas_type {:?}", schemas.schemas_type)));
            }

            schemas_list.push(schemas);
        } else if settings_mode && dir.join(SETTINGS_FILE).is_file() {
            let settings_path = dir.join(SETTINGS_FILE);
            let settings = load_settings(&settings_path, ctx, cluster_type.as_deref())?;

            if let Some(ct) = &cluster_type {
                if &settings.settings_type != ct {
                    return Err(PgMakeSchemasError::manifest(
                        &settings_path,
                        format!("settings_type {:?} is distinct from cluster_type {ct:?}", settings.settings_type),
                    ));
                }
            }

            if !settings_type_set.insert(settings.settings_type.clone()) {
                return Err(PgMakeSchemasError::manifest(&settings_path, format!("non unique settings_type {:?}", settings.settings_type)));
            }

            settings_list.push(settings);
        } else if dir.join(MIGRATIONS_FILE).is_file() {
            if migrations.is_some() {
                return Err(PgMakeSchemasError::manifest(&dir, "non unique migrations"));
            }

            let migrations_path = dir.join(MIGRATIONS_FILE);
            migrations = Some(load_migrations(&migrations_path, ctx, cluster_type.as_deref())?);
        } else {
            unreachable!("find_children_any only returns directories matching one of the filter names");
        }
    }

    Ok(ClusterDescr { application, cluster_type, revision, compatible_list, schemas_list, settings_list, migrations })
}

// ---------------------------------------------------------------------
// hosts
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHostEntry {
    shared: Option<serde_json::Value>,
    name: Option<String>,
    #[serde(rename = "type")]
    host_type: Option<String>,
    conninfo: Option<String>,
    params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
struct RawHosts {
    hosts: Vec<RawHostEntry>,
}

pub fn load_hosts(path: &Path) -> Result<HostsDescr> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| PgMakeSchemasError::Io { path: path.to_path_buf(), source })?;

    let raw: RawHosts = serde_yaml::from_str(&content)
        .map_err(|source| PgMakeSchemasError::Yaml { path: path.to_path_buf(), source })?;

    let mut host_list = Vec::new();
    let mut host_name_set = HashSet::new();
    let mut shared = None;

    for entry in raw.hosts {
        if let Some(shared_value) = entry.shared {
            if shared.is_some() {
                return Err(PgMakeSchemasError::manifest(path, "non unique shared"));
            }
            shared = Some(shared_value);
            continue;
        }

        let name = entry.name.ok_or_else(|| PgMakeSchemasError::manifest(path, "host.name is required"))?;
        let host_type = entry.host_type.unwrap_or_else(|| name.clone());

        if !host_name_set.insert(name.clone()) {
            return Err(PgMakeSchemasError::manifest(path, format!("non unique host_name {name:?}")));
        }

        host_list.push(Host { name, host_type, conninfo: entry.conninfo, params: entry.params });
    }

    Ok(HostsDescr { host_list, shared })
}

// ---------------------------------------------------------------------
// directory-child discovery shared by schemas/cluster/migrations/migration
// ---------------------------------------------------------------------

fn find_children(
    base_dir: &Path,
    include: &[String],
    first: &[String],
    last: &[String],
    ctx: &LoadCtx,
    child_file: &str,
) -> Result<Vec<PathBuf>> {
    find_children_any(base_dir, include, first, last, ctx, &[child_file])
}

fn find_children_any(
    base_dir: &Path,
    include: &[String],
    first: &[String],
    last: &[String],
    ctx: &LoadCtx,
    child_files: &[&str],
) -> Result<Vec<PathBuf>> {
    let child_files = child_files.to_vec();
    let filter = move |p: &Path| child_files.iter().any(|f| p.join(f).is_file());

    let lists = compose_fragments(base_dir, include, first, last, &ctx.include_ref_map, filter)?;

    let mut out = Vec::with_capacity(lists.first.len() + lists.regular.len() + lists.last.len());
    out.extend(lists.first);
    out.extend(lists.regular);
    out.extend(lists.last);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx_for(dir: &Path) -> LoadCtx {
        LoadCtx { allow_list: vec![dir.to_path_buf()], include_ref_map: HashMap::new() }
    }

    #[test]
    fn single_schema_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::write(root.join(CLUSTER_FILE), "cluster:\n  application: app-a\n  revision: r1\n").unwrap();
        let schemas_dir = root.join("schemas");
        fs::create_dir(&schemas_dir).unwrap();
        fs::write(schemas_dir.join(SCHEMAS_FILE), "schemas:\n  type: main\n").unwrap();
        let schema_dir = schemas_dir.join("core");
        fs::create_dir(&schema_dir).unwrap();
        fs::write(
            schema_dir.join(SCHEMA_FILE),
            "schema:\n  name: core\n  type: var\n  owner: app_owner\n  grant: [reader]\n",
        )
        .unwrap();
        fs::write(schema_dir.join("001.sql"), "create table t (id int);").unwrap();

        let ctx = ctx_for(root);
        let cluster = load_cluster(&root.join(CLUSTER_FILE), &ctx, None, false).unwrap();

        assert_eq!(cluster.application, "app-a");
        assert_eq!(cluster.revision.as_deref(), Some("r1"));
        assert_eq!(cluster.schemas_list.len(), 1);

        let schemas = &cluster.schemas_list[0];
        assert_eq!(schemas.schemas_type, "main");
        assert_eq!(schemas.var_schema_list.len(), 1);

        let schema = &schemas.var_schema_list[0];
        assert_eq!(schema.schema_name, "core");
        assert_eq!(schema.grant_list.as_deref(), Some(&["reader".to_string()][..]));

        let fragments = schema.fragments.read_sql().unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].sql, "create table t (id int);");
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join(CLUSTER_FILE),
            "cluster:\n  application: app-a\n  revision: r1\n  bogus: true\n",
        )
        .unwrap();

        let ctx = ctx_for(root);
        let err = load_cluster(&root.join(CLUSTER_FILE), &ctx, None, false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Yaml);
    }

    #[test]
    fn settings_mode_requires_compatible_not_revision() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(CLUSTER_FILE), "cluster:\n  application: app-a\n  compatible: [r0]\n").unwrap();

        let ctx = ctx_for(root);
        let cluster = load_cluster(&root.join(CLUSTER_FILE), &ctx, None, true).unwrap();
        assert!(cluster.revision.is_none());
        assert_eq!(cluster.compatible_list, vec!["r0".to_string()]);
    }

    #[test]
    fn migration_inline_type_synthesizes_one_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join(MIGRATION_FILE),
            "migration:\n  type: main\n  revision: r2\n  compatible: r1\n  sql: \"select 1;\"\n",
        )
        .unwrap();

        let ctx = ctx_for(root);
        let migration = load_migration(&root.join(MIGRATION_FILE), &ctx, None).unwrap();

        assert_eq!(migration.revision, "r2");
        assert_eq!(migration.compatible_list, vec!["r1".to_string()]);
        assert_eq!(migration.upgrade_list.len(), 1);
        assert_eq!(migration.upgrade_list[0].upgrade_type, "main");
    }

    #[test]
    fn migration_directory_walk_collects_upgrades_per_type() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(MIGRATION_FILE), "migration:\n  revision: r2\n  compatible: r1\n").unwrap();

        for host_type in ["main", "replica"] {
            let upgrade_dir = root.join(host_type);
            fs::create_dir(&upgrade_dir).unwrap();
            fs::write(
                upgrade_dir.join(UPGRADE_FILE),
                format!("upgrade:\n  type: {host_type}\n  sql: \"select 1;\"\n"),
            )
            .unwrap();
        }

        let ctx = ctx_for(root);
        let migration = load_migration(&root.join(MIGRATION_FILE), &ctx, None).unwrap();
        assert_eq!(migration.upgrade_list.len(), 2);
    }
}
