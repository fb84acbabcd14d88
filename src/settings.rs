//! Settings-cluster compatibility check: a settings cluster only applies to
//! a source cluster whose application matches and whose revision is listed
//! in the settings cluster's own `compatible_list`.

use crate::error::{PgMakeSchemasError, Result};
use crate::model::ClusterDescr;

pub fn check_settings_compatibility(source_cluster: &ClusterDescr, settings_cluster: &ClusterDescr) -> Result<()> {
    if settings_cluster.application != source_cluster.application {
        return Err(PgMakeSchemasError::config(format!(
            "settings cluster application {:?} does not match source cluster application {:?}",
            settings_cluster.application, source_cluster.application
        )));
    }

    let Some(source_revision) = &source_cluster.revision else {
        return Err(PgMakeSchemasError::config("source cluster has no revision to check settings compatibility against"));
    };

    if !settings_cluster.compatible_list.iter().any(|c| c == source_revision) {
        return Err(PgMakeSchemasError::config(format!(
            "source cluster revision {source_revision:?} is not in the settings cluster's compatible_list {:?}",
            settings_cluster.compatible_list
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(application: &str, revision: Option<&str>, compatible_list: Vec<&str>) -> ClusterDescr {
        ClusterDescr {
            application: application.to_string(),
            cluster_type: None,
            revision: revision.map(str::to_string),
            compatible_list: compatible_list.into_iter().map(str::to_string).collect(),
            schemas_list: vec![],
            settings_list: vec![],
            migrations: None,
        }
    }

    #[test]
    fn mismatched_application_is_rejected() {
        let source = cluster("app-a", Some("r1"), vec![]);
        let settings = cluster("app-b", None, vec!["r1".into()]);
        let err = check_settings_compatibility(&source, &settings).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn revision_not_in_compatible_list_is_rejected() {
        let source = cluster("app-a", Some("r2"), vec![]);
        let settings = cluster("app-a", None, vec!["r1".into()]);
        let err = check_settings_compatibility(&source, &settings).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn matching_revision_is_accepted() {
        let source = cluster("app-a", Some("r1"), vec![]);
        let settings = cluster("app-a", None, vec!["r0".into(), "r1".into()]);
        check_settings_compatibility(&source, &settings).unwrap();
    }
}
