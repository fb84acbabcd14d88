//! Migration-path planner: breadth-first search backwards from the target
//! revision through declared `(revision, compatible)` pairs until a path
//! bottoms out at the host's current revision, failing if two distinct
//! paths tie at the same frontier level.

use std::collections::HashMap;

use crate::error::{PgMakeSchemasError, Result};
use crate::model::ClusterDescr;

/// One step of a migration path: `(revision, compatible_prior_revision)`.
pub type MigrationStep = (String, String);

/// Finds the migration path from `current_revision` to
/// `cluster.revision`. Returns `Ok(Some(vec![]))` when already at the
/// target, `Ok(None)` when no path exists, and `Err` when the search is
/// ambiguous.
pub fn find_migration_way(cluster: &ClusterDescr, current_revision: Option<&str>) -> Result<Option<Vec<MigrationStep>>> {
    let target = cluster.revision.as_deref();

    if current_revision == target {
        return Ok(Some(vec![]));
    }

    let Some(migrations) = &cluster.migrations else { return Ok(None) };

    let mut compatible_by_revision: HashMap<String, Vec<String>> = HashMap::new();
    let mut candidates: Vec<Vec<MigrationStep>> = Vec::new();

    for migration in &migrations.migration_list {
        compatible_by_revision
            .entry(migration.revision.clone())
            .or_default()
            .extend(migration.compatible_list.iter().cloned());

        if Some(migration.revision.as_str()) != target {
            continue;
        }

        for compatible in &migration.compatible_list {
            candidates.push(vec![(migration.revision.clone(), compatible.clone())]);
        }
    }

    while !candidates.is_empty() {
        let mut found: Option<&Vec<MigrationStep>> = None;

        for candidate in &candidates {
            let bottom_compatible = &candidate[0].1;
            if Some(bottom_compatible.as_str()) != current_revision {
                continue;
            }

            if let Some(previous) = found {
                return Err(PgMakeSchemasError::migration(format!(
                    "ambiguous migration way to {current_revision:?}: {previous:?} vs {candidate:?}"
                )));
            }

            found = Some(candidate);
        }

        if let Some(result) = found {
            return Ok(Some(result.clone()));
        }

        let mut next = Vec::new();
        for candidate in &candidates {
            let bottom_compatible = candidate[0].1.clone();
            let Some(compatible_list) = compatible_by_revision.get(&bottom_compatible) else { continue };

            for compatible in compatible_list {
                let mut extended = vec![(bottom_compatible.clone(), compatible.clone())];
                extended.extend(candidate.clone());
                next.push(extended);
            }
        }

        candidates = next;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MigrationDescr, MigrationsDescr};

    fn cluster_with(revision: &str, migrations: Vec<(&str, &[&str])>) -> ClusterDescr {
        let migration_list = migrations
            .into_iter()
            .map(|(rev, compat)| MigrationDescr {
                revision: rev.to_string(),
                compatible_list: compat.iter().map(|s| s.to_string()).collect(),
                upgrade_list: vec![],
            })
            .collect();

        ClusterDescr {
            application: "app".into(),
            cluster_type: None,
            revision: Some(revision.to_string()),
            compatible_list: vec![],
            schemas_list: vec![],
            settings_list: vec![],
            migrations: Some(MigrationsDescr { migration_list }),
        }
    }

    #[test]
    fn already_at_target_returns_empty_path() {
        let cluster = cluster_with("r1", vec![]);
        let way = find_migration_way(&cluster, Some("r1")).unwrap();
        assert_eq!(way, Some(vec![]));
    }

    #[test]
    fn single_hop_migration() {
        let cluster = cluster_with("r2", vec![("r2", &["r1"])]);
        let way = find_migration_way(&cluster, Some("r1")).unwrap();
        assert_eq!(way, Some(vec![("r2".to_string(), "r1".to_string())]));
    }

    #[test]
    fn multi_hop_migration_chains_backwards() {
        let cluster = cluster_with("r3", vec![("r3", &["r2"]), ("r2", &["r1"])]);
        let way = find_migration_way(&cluster, Some("r1")).unwrap();
        assert_eq!(way, Some(vec![("r2".to_string(), "r1".to_string()), ("r3".to_string(), "r2".to_string())]));
    }

    #[test]
    fn no_path_returns_none() {
        let cluster = cluster_with("r2", vec![("r2", &["r1"])]);
        let way = find_migration_way(&cluster, Some("r0")).unwrap();
        assert_eq!(way, None);
    }

    #[test]
    fn ambiguous_path_at_same_level_is_an_error() {
        let cluster = cluster_with("r2", vec![("r2", &["r1", "r1b"]), ("r1", &["r0"]), ("r1b", &["r0"])]);
        let err = find_migration_way(&cluster, Some("r0")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Migration);
    }

    #[test]
    fn no_migrations_declared_is_none() {
        let cluster = ClusterDescr {
            application: "app".into(),
            cluster_type: None,
            revision: Some("r1".into()),
            compatible_list: vec![],
            schemas_list: vec![],
            settings_list: vec![],
            migrations: None,
        };
        assert_eq!(find_migration_way(&cluster, Some("r0")).unwrap(), None);
    }
}
