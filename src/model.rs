//! Typed in-memory source-tree model. Every descriptor is built once by the
//! loader and never mutated afterwards; ownership is strictly tree-shaped,
//! so there is nothing here that needs `Rc`/`Arc`.

use std::path::PathBuf;

use crate::path_guard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    First,
    Regular,
    Inline,
    Last,
}

/// Diagnostic metadata attached to a single yielded SQL fragment: where it
/// came from, and (once role/search-path has been applied) what role and
/// schema it ran under.
#[derive(Debug, Clone, Default)]
pub struct FragmentInfo {
    pub file_path: Option<String>,
    pub file_path_type: Option<FragmentKind>,
    pub pg_role: Option<String>,
    pub pg_search_path: Option<String>,
}

impl FragmentInfo {
    pub fn describe(&self) -> String {
        match (&self.file_path, self.file_path_type) {
            (Some(path), Some(kind)) => format!("{path} ({kind:?})"),
            (Some(path), None) => path.clone(),
            (None, _) => "<inline>".to_string(),
        }
    }
}

/// A single SQL statement paired with the fragment metadata it was read
/// with. Fragment contents are streamed lazily from descriptors via
/// `FragmentSource::read_sql`, never buffered as a whole corpus.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub sql: String,
    pub info: FragmentInfo,
}

/// The resolved, ordered file lists a manifest's `include`/`first`/`last`
/// keys compose down to. `first`/`regular`/`last` paths are absolute;
/// `inline` is the manifest's own `sql:` scalar, if present.
#[derive(Debug, Clone, Default)]
pub struct FragmentSet {
    pub first: Vec<PathBuf>,
    pub regular: Vec<PathBuf>,
    pub last: Vec<PathBuf>,
    pub inline: Option<String>,
    /// Directory fragment paths are reported relative to, for diagnostics
    /// (the manifest's own include-allow-list tail).
    pub relative_to: PathBuf,
    /// The manifest file path itself, used as the "file path" for the
    /// inline fragment's metadata.
    pub manifest_path: PathBuf,
    /// Directories a fragment file must live inside of to be read; checked
    /// on every `first`/`regular`/`last` path before it's opened.
    pub allow_list: Vec<PathBuf>,
}

impl FragmentSet {
    /// Lazily yields `(sql, info)` in composed order: first, regular,
    /// inline, last.
    pub fn read_sql(&self) -> Result<Vec<Fragment>, crate::error::PgMakeSchemasError> {
        let mut out = Vec::with_capacity(self.first.len() + self.regular.len() + self.last.len() + 1);

        for path in &self.first {
            out.push(self.read_one(path, FragmentKind::First)?);
        }
        for path in &self.regular {
            out.push(self.read_one(path, FragmentKind::Regular)?);
        }
        if let Some(sql) = &self.inline {
            out.push(Fragment {
                sql: sql.clone(),
                info: FragmentInfo {
                    file_path: rel_path(&self.manifest_path, &self.relative_to),
                    file_path_type: Some(FragmentKind::Inline),
                    pg_role: None,
                    pg_search_path: None,
                },
            });
        }
        for path in &self.last {
            out.push(self.read_one(path, FragmentKind::Last)?);
        }

        Ok(out)
    }

    fn read_one(&self, path: &PathBuf, kind: FragmentKind) -> Result<Fragment, crate::error::PgMakeSchemasError> {
        let sql = path_guard::read_to_string_safely(path, &self.allow_list)?;
        Ok(Fragment {
            sql,
            info: FragmentInfo {
                file_path: rel_path(path, &self.relative_to),
                file_path_type: Some(kind),
                pg_role: None,
                pg_search_path: None,
            },
        })
    }
}

fn rel_path(path: &PathBuf, base: &PathBuf) -> Option<String> {
    path.strip_prefix(base).ok().map(|p| p.display().to_string()).or_else(|| Some(path.display().to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Var,
    Func,
}

#[derive(Debug, Clone)]
pub struct SchemaDescr {
    pub schema_name: String,
    pub schema_type: SchemaType,
    pub owner: String,
    pub grant_list: Option<Vec<String>>,
    pub fragments: FragmentSet,
}

#[derive(Debug, Clone)]
pub struct InitDescr {
    pub fragments: FragmentSet,
}

#[derive(Debug, Clone)]
pub struct LateDescr {
    pub fragments: FragmentSet,
}

#[derive(Debug, Clone)]
pub struct SafeguardDescr {
    pub fragments: FragmentSet,
}

#[derive(Debug, Clone)]
pub struct SettingsDescr {
    pub settings_type: String,
    pub fragments: FragmentSet,
}

#[derive(Debug, Clone)]
pub struct UpgradeDescr {
    pub upgrade_type: String,
    pub fragments: FragmentSet,
}

#[derive(Debug, Clone)]
pub struct MigrationDescr {
    pub revision: String,
    pub compatible_list: Vec<String>,
    pub upgrade_list: Vec<UpgradeDescr>,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationsDescr {
    pub migration_list: Vec<MigrationDescr>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemasDescr {
    pub schemas_type: String,
    pub init: Option<InitDescr>,
    pub var_schema_list: Vec<SchemaDescr>,
    pub late: Option<LateDescr>,
    pub func_schema_list: Vec<SchemaDescr>,
    pub safeguard: Option<SafeguardDescr>,
}

#[derive(Debug, Clone)]
pub struct ClusterDescr {
    pub application: String,
    pub cluster_type: Option<String>,
    /// `None` when loaded in settings mode (see `compatible_list`).
    pub revision: Option<String>,
    pub compatible_list: Vec<String>,
    pub schemas_list: Vec<SchemasDescr>,
    pub settings_list: Vec<SettingsDescr>,
    pub migrations: Option<MigrationsDescr>,
}

impl ClusterDescr {
    pub fn schemas_for(&self, host_type: &str) -> Option<&SchemasDescr> {
        self.schemas_list.iter().find(|s| s.schemas_type == host_type)
    }

    pub fn var_schema_names(&self, host_type: &str) -> Vec<String> {
        self.schemas_for(host_type).map(|s| s.var_schema_list.iter().map(|d| d.schema_name.clone()).collect()).unwrap_or_default()
    }

    pub fn func_schema_names(&self, host_type: &str) -> Vec<String> {
        self.schemas_for(host_type).map(|s| s.func_schema_list.iter().map(|d| d.schema_name.clone()).collect()).unwrap_or_default()
    }

    pub fn init_fragments(&self, host_type: &str) -> Option<&InitDescr> {
        self.schemas_for(host_type).and_then(|s| s.init.as_ref())
    }

    pub fn late_fragments(&self, host_type: &str) -> Option<&LateDescr> {
        self.schemas_for(host_type).and_then(|s| s.late.as_ref())
    }

    pub fn safeguard_fragments(&self, host_type: &str) -> Option<&SafeguardDescr> {
        self.schemas_for(host_type).and_then(|s| s.safeguard.as_ref())
    }

    pub fn settings_for(&self, host_type: &str) -> Option<&SettingsDescr> {
        self.settings_list.iter().find(|s| s.settings_type == host_type)
    }

    /// The single `UpgradeDescr` for `host_type` within the migration
    /// whose revision and compatible prior match `step`. Errors if more
    /// than one migration declares the same `(revision, compatible)` pair
    /// (the loader already rejects this, so this is a defense-in-depth
    /// re-check at read time).
    pub fn upgrade_for_step(&self, host_type: &str, step: &(String, String)) -> crate::error::Result<Option<&UpgradeDescr>> {
        let Some(migrations) = &self.migrations else { return Ok(None) };

        let mut found = None;
        for migration in &migrations.migration_list {
            if migration.revision != step.0 || !migration.compatible_list.iter().any(|c| c == &step.1) {
                continue;
            }

            if found.is_some() {
                return Err(crate::error::PgMakeSchemasError::migration(format!("non unique migration for step {step:?}")));
            }

            found = Some(migration);
        }

        let Some(migration) = found else { return Ok(None) };
        Ok(migration.upgrade_list.iter().find(|u| u.upgrade_type == host_type))
    }
}

#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub host_type: String,
    pub conninfo: Option<String>,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct HostsDescr {
    pub host_list: Vec<Host>,
    pub shared: Option<serde_json::Value>,
}

impl HostsDescr {
    /// Builds one pseudo-host per `schemas_type`, with empty conninfo, for
    /// dry-run SQL emission when no hosts file was given.
    pub fn load_pseudo(cluster: &ClusterDescr) -> Self {
        let host_list = cluster
            .schemas_list
            .iter()
            .map(|schemas| Host {
                name: schemas.schemas_type.clone(),
                host_type: schemas.schemas_type.clone(),
                conninfo: None,
                params: None,
            })
            .collect();

        HostsDescr { host_list, shared: None }
    }
}
