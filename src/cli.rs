//! CLI surface: `RawArgs` is the literal clap-derived shape, `Args` is the
//! validated/normalized shape the rest of the crate consumes, built by
//! `Args::from_raw_args`.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Installs and upgrades PostgreSQL schemas across hosts from a revisioned source tree.")]
pub struct RawArgs {
    /// number of times repeated, raises logging verbosity (twice logs per-fragment detail)
    #[clap(short, long, parse(from_occurrences))]
    verbose: u8,

    /// actually run the generated SQL against each host
    #[clap(short, long)]
    execute: bool,

    /// run with --execute but roll back every host's transaction instead of committing (implies --execute)
    #[clap(short, long)]
    pretend: bool,

    /// write the generated SQL (and, under --execute, driver notices) to PREFIX.<host>.<host_type>.{sql,notices}
    #[clap(short, long)]
    output: Option<String>,

    /// NAME=VALUE pairs or bare paths resolving $NAME/${NAME} include-references, or extra search directories
    #[clap(short, long = "include")]
    include_list: Vec<String>,

    /// path to the hosts manifest, or "-" for an empty pseudo-hosts set
    hosts: String,

    /// path to the cluster's source-code directory
    source_code: PathBuf,

    /// zero or more settings-cluster source-code directories
    settings_source_code: Vec<PathBuf>,

    /// attach a comment to the pushed revision row, from --comment-path's script
    #[clap(short, long)]
    comment: bool,

    /// explicit path to the comment script (defaults to <source_code>/comment.sh)
    #[clap(long, env = "PG_MAKE_SCHEMAS_COMMENT")]
    comment_path: Option<PathBuf>,

    #[clap(subcommand)]
    command: RawCommand,
}

#[derive(clap::Subcommand, Debug)]
enum RawCommand {
    /// create schemas and bookkeeping structures for a cluster that has never been installed
    Init,
    /// install a cluster, optionally reinstalling existing schemas
    Install {
        #[clap(long)]
        reinstall: bool,
        #[clap(long)]
        reinstall_func: bool,
        #[clap(long)]
        cascade: bool,
        #[clap(long)]
        weak_guard_acls: bool,
        #[clap(long)]
        init: bool,
    },
    /// migrate an installed cluster from its current revision to the source tree's target revision
    Upgrade {
        #[clap(long)]
        show_rev: bool,
        #[clap(long)]
        change_rev: bool,
        #[clap(short, long)]
        rev: Option<String>,
        #[clap(long)]
        weak_guard_acls: bool,
        #[clap(long)]
        init: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum Command {
    Init,
    Install { reinstall: bool, reinstall_func: bool, cascade: bool, weak_guard_acls: bool, init: bool },
    Upgrade { show_rev: bool, change_rev: bool, weak_guard_acls: bool, init: bool },
}

#[derive(Debug)]
pub struct Args {
    pub verbose: u8,
    pub execute: bool,
    pub pretend: bool,
    pub output: Option<String>,
    pub include_list: Vec<String>,
    pub hosts: Option<String>,
    pub source_code: PathBuf,
    pub settings_source_code: Vec<PathBuf>,
    pub comment: bool,
    pub comment_path: Option<PathBuf>,
    pub rev: Option<String>,
    pub command: Command,
}

impl Args {
    pub fn from_raw_args(raw_args: RawArgs) -> Result<Args> {
        let RawArgs {
            verbose,
            execute,
            pretend,
            output,
            include_list,
            hosts,
            source_code,
            settings_source_code,
            comment,
            comment_path,
            command,
        } = raw_args;

        let execute = execute || pretend;
        let hosts = if hosts == "-" { None } else { Some(hosts) };
        // PG_MAKE_SCHEMAS_COMMENT overrides the comment-script path and implies --comment.
        let comment = comment || comment_path.is_some();

        let (command, rev) = match command {
            RawCommand::Init => (Command::Init, None),
            RawCommand::Install { reinstall, reinstall_func, cascade, weak_guard_acls, init } => {
                if reinstall && !reinstall_func && !cascade {
                    return Err(anyhow!("unable to reinstall variable schemas without cascaded dropping"));
                }
                (Command::Install { reinstall, reinstall_func, cascade, weak_guard_acls, init }, None)
            }
            RawCommand::Upgrade { show_rev, change_rev, rev, weak_guard_acls, init } => {
                if rev.is_none() && !execute {
                    return Err(anyhow!("unable to upgrade without any information about revision"));
                }
                (Command::Upgrade { show_rev, change_rev, weak_guard_acls, init }, rev)
            }
        };

        Ok(Args {
            verbose,
            execute,
            pretend,
            output,
            include_list,
            hosts,
            source_code,
            settings_source_code,
            comment,
            comment_path,
            rev,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(command: RawCommand) -> RawArgs {
        RawArgs {
            verbose: 0,
            execute: false,
            pretend: false,
            output: None,
            include_list: vec![],
            hosts: "-".to_string(),
            source_code: PathBuf::from("."),
            settings_source_code: vec![],
            comment: false,
            comment_path: None,
            command,
        }
    }

    #[test]
    fn dash_hosts_means_no_hosts_file() {
        let args = Args::from_raw_args(raw(RawCommand::Init)).unwrap();
        assert_eq!(args.hosts, None);
    }

    #[test]
    fn pretend_implies_execute() {
        let mut raw_args = raw(RawCommand::Init);
        raw_args.pretend = true;
        let args = Args::from_raw_args(raw_args).unwrap();
        assert!(args.execute);
    }

    #[test]
    fn reinstall_without_cascade_or_func_only_is_rejected() {
        let raw_args = raw(RawCommand::Install { reinstall: true, reinstall_func: false, cascade: false, weak_guard_acls: false, init: false });
        assert!(Args::from_raw_args(raw_args).is_err());
    }

    #[test]
    fn upgrade_without_rev_requires_execute() {
        let raw_args = raw(RawCommand::Upgrade { show_rev: false, change_rev: false, rev: None, weak_guard_acls: false, init: false });
        assert!(Args::from_raw_args(raw_args).is_err());
    }

    #[test]
    fn upgrade_with_explicit_rev_does_not_require_execute() {
        let raw_args = raw(RawCommand::Upgrade { show_rev: false, change_rev: false, rev: Some("r1".into()), weak_guard_acls: false, init: false });
        Args::from_raw_args(raw_args).unwrap();
    }
}
