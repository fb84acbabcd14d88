//! Per-fragment operator logging, emitted as `tracing` calls: verbosity is
//! carried by the global subscriber's filter level (warn at `-v` 0, info at
//! 1, debug — including per-fragment SQL detail — at 2+), set up once in
//! `main`.

use tracing::{debug, info};

use crate::model::Fragment;

fn format_frag(fragment_i: Option<u64>) -> String {
    match fragment_i {
        Some(i) => format!("since fragment {i}"),
        None => "non numbered fragment".to_string(),
    }
}

pub fn prepare_init() {
    info!("preparing for initialization...");
}

pub fn prepare_install() {
    info!("preparing for installing...");
}

pub fn prepare_upgrade() {
    info!("preparing for upgrading...");
}

pub fn source_code_revision(application: &str, revision: Option<&str>, comment: Option<&str>) {
    info!(application, revision, comment, "source code revision");
}

pub fn begin_host(host_name: &str) {
    info!(host_name, "beginning...");
}

pub fn scr_env(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "making script environment ({})...", format_frag(fragment_i));
}

pub fn ensure_revision_structs(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "ensuring revision structures ({})...", format_frag(fragment_i));
}

pub fn guard_var_revision(host_name: &str, revision: Option<&str>, fragment_i: Option<u64>) {
    info!(host_name, ?revision, "guarding var revision ({})...", format_frag(fragment_i));
}

pub fn guard_func_revision(host_name: &str, revision: Option<&str>, fragment_i: Option<u64>) {
    info!(host_name, ?revision, "guarding func revision ({})...", format_frag(fragment_i));
}

pub fn clean_var_revision(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "cleaning var revision ({})...", format_frag(fragment_i));
}

pub fn clean_func_revision(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "cleaning func revision ({})...", format_frag(fragment_i));
}

pub fn arch_var_revision(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "archiving var revision ({})...", format_frag(fragment_i));
}

pub fn arch_func_revision(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "archiving func revision ({})...", format_frag(fragment_i));
}

pub fn push_var_revision(host_name: &str, revision: &str, comment: Option<&str>, fragment_i: Option<u64>) {
    info!(host_name, revision, comment, "pushing var revision ({})...", format_frag(fragment_i));
}

pub fn push_func_revision(host_name: &str, revision: &str, comment: Option<&str>, fragment_i: Option<u64>) {
    info!(host_name, revision, comment, "pushing func revision ({})...", format_frag(fragment_i));
}

pub fn drop_var_schemas(host_name: &str, cascade: bool, fragment_i: Option<u64>) {
    info!(host_name, cascade, "dropping var schemas ({})...", format_frag(fragment_i));
}

pub fn drop_func_schemas(host_name: &str, cascade: bool, fragment_i: Option<u64>) {
    info!(host_name, cascade, "dropping func schemas ({})...", format_frag(fragment_i));
}

pub fn create_schema(host_name: &str, schema_name: &str, fragment_i: Option<u64>) {
    info!(host_name, schema_name, "creating schema ({})...", format_frag(fragment_i));
}

pub fn guard_acls(host_name: &str, schema_name: &str, weak: bool, fragment_i: Option<u64>) {
    info!(host_name, schema_name, weak, "guarding acls ({})...", format_frag(fragment_i));
}

/// Emits the per-script-kind "executing N scripts" line, plus (at debug
/// level) a per-fragment detail line naming the fragment's source file and
/// applied role/search-path.
pub fn execute_sql(host_name: &str, script_type: &str, fragment_i: Option<u64>, fragment: Option<&Fragment>) {
    match fragment {
        None => info!(host_name, script_type, "executing scripts ({})...", format_frag(fragment_i)),
        Some(fragment) => debug!(
            host_name,
            script_type,
            file_path = fragment.info.file_path.as_deref().unwrap_or("<unknown-file>"),
            file_path_type = ?fragment.info.file_path_type,
            pg_role = fragment.info.pg_role.as_deref(),
            pg_search_path = fragment.info.pg_search_path.as_deref(),
            "script fragment ({})...",
            format_frag(fragment_i)
        ),
    }
}

pub fn clean_scr_env(host_name: &str, fragment_i: Option<u64>) {
    info!(host_name, "cleaning script environment ({})...", format_frag(fragment_i));
}

pub fn finish_host(host_name: &str) {
    info!(host_name, "finishing...");
}
