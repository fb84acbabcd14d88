use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use pg_make_schemas::cli::{Args, Command, RawArgs};
use pg_make_schemas::comment::{self, COMMENT_FILE_NAME};
use pg_make_schemas::loader::{self, LoadCtx};
use pg_make_schemas::model::{ClusterDescr, HostsDescr};
use pg_make_schemas::orchestrator::{self, InstallOptions, UpgradeOptions};
use pg_make_schemas::receivers::Receivers;
use pg_make_schemas::settings::check_settings_compatibility;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}

fn load_ctx(source_code: &Path, include_list: &[String]) -> Result<LoadCtx> {
    let mut allow_list = Vec::with_capacity(include_list.len() + 1);
    let mut include_ref_map = std::collections::HashMap::new();

    for include in include_list {
        // `NAME=VALUE` both registers an include-reference and adds VALUE
        // as a search directory; a bare path only does the latter.
        let (name, path) = match include.split_once('=') {
            Some((name, value)) => (Some(name), value),
            None => (None, include.as_str()),
        };

        let canon = std::fs::canonicalize(path).with_context(|| format!("{path}: unable to resolve --include path"))?;

        if let Some(name) = name {
            include_ref_map.insert(name.to_string(), canon.clone());
        }
        allow_list.push(canon);
    }

    allow_list.push(std::fs::canonicalize(source_code).with_context(|| format!("{}: unable to resolve source-code path", source_code.display()))?);
    Ok(LoadCtx { allow_list, include_ref_map })
}

fn load_cluster_tree(source_code: &Path, include_list: &[String], settings_mode: bool) -> Result<ClusterDescr> {
    let cluster_path = source_code.join(loader::CLUSTER_FILE);
    let ctx = load_ctx(source_code, include_list)?;
    Ok(loader::load_cluster(&cluster_path, &ctx, None, settings_mode)?)
}

fn resolve_comment(args: &Args) -> Result<Option<String>> {
    if !args.comment {
        return Ok(None);
    }
    let comment_path = match &args.comment_path {
        Some(path) => path.clone(),
        None => args.source_code.join(COMMENT_FILE_NAME),
    };
    Ok(Some(comment::comment(&comment_path)?))
}

fn main() -> Result<()> {
    let args = Args::from_raw_args(RawArgs::parse())?;
    init_tracing(args.verbose);

    let source_cluster = load_cluster_tree(&args.source_code, &args.include_list, false)?;

    let hosts = match &args.hosts {
        Some(hosts_path) => loader::load_hosts(Path::new(hosts_path))?,
        None => HostsDescr::load_pseudo(&source_cluster),
    };

    let mut settings_clusters = Vec::with_capacity(args.settings_source_code.len());
    for settings_source_code in &args.settings_source_code {
        let settings_cluster = load_cluster_tree(settings_source_code, &args.include_list, true)?;
        check_settings_compatibility(&source_cluster, &settings_cluster)?;
        settings_clusters.push(settings_cluster);
    }

    let comment = resolve_comment(&args)?;
    let mut receivers = Receivers::new(args.execute, args.pretend, args.output.clone());

    let result = match args.command {
        Command::Init => orchestrator::run_init(&source_cluster, &hosts, &mut receivers),
        Command::Install { reinstall, reinstall_func, cascade, weak_guard_acls, init } => {
            let opts = InstallOptions { reinstall, reinstall_func, cascade, weak_guard_acls, init };
            orchestrator::run_install(&source_cluster, &settings_clusters, &hosts, &opts, comment.as_deref(), &mut receivers)
        }
        Command::Upgrade { show_rev, change_rev, weak_guard_acls, init } => {
            let opts = UpgradeOptions { show_rev, change_rev, weak_guard_acls, init, rev: args.rev.clone() };
            orchestrator::run_upgrade(&source_cluster, &settings_clusters, &hosts, &opts, comment.as_deref(), &mut receivers)
        }
    };

    result.context("deployment failed")
}
