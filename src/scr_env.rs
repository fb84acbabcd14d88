//! Scr-env SQL generator: installs temporary `pg_temp` functions exposing
//! the current host's identity and the full host roster (as JSON) so
//! fragment SQL can branch on which host it's running against, plus a
//! matching cleanup statement.

use serde_json::json;

use crate::model::HostsDescr;
use crate::pg_literal::{pg_dollar_quote, pg_quote};

fn sql_function(name: &str, return_type: &str, body: &str) -> String {
    format!(
        "create function pg_temp.{name} ()\nreturns {return_type} language sql stable\nas {};",
        pg_dollar_quote("function", Some(body))
    )
}

/// Emits the five temporary functions exposing this host's identity and
/// the cluster's host roster to SQL running during its phase.
pub fn scr_env(hosts: &HostsDescr, host_name: &str) -> String {
    let host = hosts.host_list.iter().find(|h| h.name == host_name);
    let host_type = host.map(|h| h.host_type.as_str());
    let host_params = host.and_then(|h| h.params.clone());

    let host_name_body = format!("select {}::text", pg_quote(Some(host_name)));
    let host_type_body = format!("select {}::text", pg_quote(host_type));
    let host_params_json = serde_json::to_string_pretty(&host_params.unwrap_or(serde_json::Value::Null)).unwrap();
    let host_params_body = format!("select {}::json", pg_dollar_quote("json", Some(&host_params_json)));
    let shared_json = serde_json::to_string_pretty(&hosts.shared.clone().unwrap_or(serde_json::Value::Null)).unwrap();
    let shared_body = format!("select {}::json", pg_dollar_quote("json", Some(&shared_json)));

    let host_list_value: Vec<_> = hosts
        .host_list
        .iter()
        .map(|h| json!({"name": h.name, "type": h.host_type}))
        .collect();
    let host_list_json = serde_json::to_string_pretty(&host_list_value).unwrap();
    let host_list_body = format!("select {}::json", pg_dollar_quote("json", Some(&host_list_json)));

    [
        sql_function("scr_env_host_name", "text", &host_name_body),
        sql_function("scr_env_host_type", "text", &host_type_body),
        sql_function("scr_env_host_params", "json", &host_params_body),
        sql_function("scr_env_shared", "json", &shared_body),
        sql_function("scr_env_host_list", "json", &host_list_body),
    ]
    .join("\n\n")
}

pub fn clean_scr_env() -> String {
    [
        "drop function pg_temp.scr_env_host_name ();",
        "drop function pg_temp.scr_env_host_type ();",
        "drop function pg_temp.scr_env_host_params ();",
        "drop function pg_temp.scr_env_shared ();",
        "drop function pg_temp.scr_env_host_list ();",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Host;

    fn hosts_fixture() -> HostsDescr {
        HostsDescr {
            host_list: vec![
                Host { name: "db1".into(), host_type: "main".into(), conninfo: None, params: Some(json!({"k": 1})) },
                Host { name: "db2".into(), host_type: "replica".into(), conninfo: None, params: None },
            ],
            shared: Some(json!({"env": "prod"})),
        }
    }

    #[test]
    fn scr_env_emits_five_functions() {
        let sql = scr_env(&hosts_fixture(), "db1");
        for name in ["scr_env_host_name", "scr_env_host_type", "scr_env_host_params", "scr_env_shared", "scr_env_host_list"] {
            assert!(sql.contains(name), "missing {name}");
        }
        assert!(sql.contains("\"main\""));
    }

    #[test]
    fn scr_env_unknown_host_has_null_type_and_params() {
        let sql = scr_env(&hosts_fixture(), "unknown");
        assert!(sql.contains("select null::text"));
    }

    #[test]
    fn clean_scr_env_drops_all_five() {
        let sql = clean_scr_env();
        assert_eq!(sql.matches("drop function").count(), 5);
    }
}
