//! Per-host `Receivers` sink: simultaneous DB execution, SQL-file
//! mirroring, and notices-file mirroring, with ordered fragment counters
//! and reverse-order cleanup on close.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;

use postgres::Client;

use crate::connection::connect_database;
use crate::error::{PgMakeSchemasError, Result};
use crate::model::{Fragment, Host, HostsDescr};

fn sanitize_for_filename(s: &str) -> String {
    s.replace('/', "-").replace('.', "-")
}

fn output_path(prefix: &str, host_name: &str, host_type: &str, suffix: &str) -> String {
    format!("{prefix}.{}.{}.{suffix}", sanitize_for_filename(host_name), sanitize_for_filename(host_type))
}

fn write_header(fd: &mut File) -> Result<()> {
    write_raw(fd, "-- -*- mode: sql; coding: utf-8 -*-\n\n--begin;\n\n")
}

fn write_footer(fd: &mut File) -> Result<()> {
    write_raw(fd, "--commit;\n")
}

fn write_raw(fd: &mut File, s: &str) -> Result<()> {
    fd.write_all(s.as_bytes()).and_then(|_| fd.flush()).map_err(|source| PgMakeSchemasError::Io { path: "<sql output>".into(), source })
}

/// `{conn?, out_fd?, notices_fd?, fragment_counter}` per host, indexed by
/// host name, plus insertion order for reverse-order teardown.
#[derive(Default)]
pub struct Receivers {
    execute: bool,
    pretend: bool,
    output: Option<String>,
    notices: bool,
    con_map: HashMap<String, Client>,
    fd_map: HashMap<String, File>,
    nfd_map: HashMap<String, File>,
    frag_cnt_map: HashMap<String, u64>,
    host_order: Vec<String>,
}

impl Receivers {
    pub fn new(execute: bool, pretend: bool, output: Option<String>) -> Self {
        let notices = execute && output.is_some();
        Receivers { execute, pretend, output, notices, ..Default::default() }
    }

    pub fn begin(&mut self, hosts: &HostsDescr) -> Result<()> {
        for host in &hosts.host_list {
            self.begin_host(host)?;
        }
        Ok(())
    }

    pub fn begin_host(&mut self, host: &Host) -> Result<()> {
        if self.execute {
            if self.con_map.contains_key(&host.name) {
                return Err(PgMakeSchemasError::receivers(host.name.as_str(), "<begin_host>", NonUniqueHost));
            }

            let conninfo = host
                .conninfo
                .as_deref()
                .ok_or_else(|| PgMakeSchemasError::config(format!("{:?}: unable to connect to host without its conninfo", host.name)))?;

            let mut client = connect_database(conninfo).map_err(|e| PgMakeSchemasError::receivers(host.name.as_str(), "<connect>", AnyhowWrap(e)))?;
            client
                .batch_execute("begin;")
                .map_err(|e| PgMakeSchemasError::receivers(host.name.as_str(), "<begin transaction>", e))?;

            self.con_map.insert(host.name.clone(), client);
            self.host_order.push(host.name.clone());
        }

        if let Some(prefix) = &self.output {
            if self.fd_map.contains_key(&host.name) {
                return Err(PgMakeSchemasError::receivers(host.name.as_str(), "<begin_host>", NonUniqueHost));
            }

            let path = output_path(prefix, &host.name, &host.host_type, "sql");
            let mut fd = File::create(&path).map_err(|source| PgMakeSchemasError::Io { path: path.clone().into(), source })?;
            write_header(&mut fd)?;

            self.fd_map.insert(host.name.clone(), fd);
            self.frag_cnt_map.insert(host.name.clone(), 1);
        }

        if self.notices {
            if self.nfd_map.contains_key(&host.name) {
                return Err(PgMakeSchemasError::receivers(host.name.as_str(), "<begin_host>", NonUniqueHost));
            }

            let prefix = self.output.as_deref().unwrap();
            let path = output_path(prefix, &host.name, &host.host_type, "notices");
            let fd = File::create(&path).map_err(|source| PgMakeSchemasError::Io { path: path.into(), source })?;
            self.nfd_map.insert(host.name.clone(), fd);
        }

        Ok(())
    }

    /// Previews the next fragment index without consuming it — used for
    /// verbose per-fragment logging.
    pub fn look_fragment_i(&self, host_name: &str) -> Option<u64> {
        self.frag_cnt_map.get(host_name).copied()
    }

    /// Exposes a host's live connection for a direct, result-returning
    /// query (e.g. fetching its currently-recorded revision), bypassing the
    /// fire-and-forget `execute` path. `None` outside `--execute`.
    pub fn client_mut(&mut self, host_name: &str) -> Option<&mut Client> {
        self.con_map.get_mut(host_name)
    }

    fn write_fragment(&mut self, host_name: &str, fragment: &Fragment) -> Result<()> {
        if let Some(fd) = self.fd_map.get_mut(host_name) {
            write_raw(fd, &fragment.sql)?;
            write_raw(fd, "\n\n")?;
        }
        Ok(())
    }

    fn write_notices(&mut self, host_name: &str, notices: &[String]) -> Result<()> {
        if let Some(nfd) = self.nfd_map.get_mut(host_name) {
            for notice in notices {
                write_raw(nfd, notice)?;
                write_raw(nfd, "\n")?;
            }
        }
        Ok(())
    }

    fn write_fragment_ok_notice(&mut self, host_name: &str) -> Result<()> {
        let Some(counter) = self.frag_cnt_map.get_mut(host_name) else { return Ok(()) };
        let fragment_i = *counter;
        *counter += 1;

        if let Some(fd) = self.fd_map.get_mut(host_name) {
            write_raw(fd, &format!("do $do$begin raise notice 'fragment {fragment_i}: ok'; end$do$;\n\n"))?;
        }

        if self.notices {
            if let Some(nfd) = self.nfd_map.get_mut(host_name) {
                write_raw(nfd, &format!("\nfragment {fragment_i}: ok\n\n"))?;
            }
        }

        Ok(())
    }

    /// Writes `fragment` to the output file (if any), executes it against
    /// the host's connection (if `--execute`), then bumps the fragment
    /// counter and writes its "ok" marker.
    pub fn execute(&mut self, host_name: &str, fragment: &Fragment) -> Result<()> {
        self.write_fragment(host_name, fragment)?;

        if self.execute {
            let notices_enabled = self.notices;
            let result = {
                let client = self.con_map.get_mut(host_name).expect("begin_host must run before execute");
                client.batch_execute(&fragment.sql)
            };

            // The sync postgres facade doesn't expose the server notice
            // stream, so notice files stay empty besides the "ok" markers.
            let notices: Vec<String> = vec![];
            if notices_enabled {
                self.write_notices(host_name, &notices)?;
            }

            if let Err(e) = result {
                return Err(PgMakeSchemasError::receivers(host_name, fragment.info.describe(), e));
            }
        }

        self.write_fragment_ok_notice(host_name)
    }

    pub fn finish(&mut self, hosts: &HostsDescr) -> Result<()> {
        for host in &hosts.host_list {
            self.finish_host(&host.name)?;
        }
        Ok(())
    }

    pub fn finish_host(&mut self, host_name: &str) -> Result<()> {
        if self.execute {
            if let Some(client) = self.con_map.get_mut(host_name) {
                let statement = if self.pretend { "rollback;" } else { "commit;" };
                client.batch_execute(statement).map_err(|e| PgMakeSchemasError::receivers(host_name, "<finish_host>", e))?;
            }
        }

        if self.notices {
            if let Some(mut nfd) = self.nfd_map.remove(host_name) {
                nfd.flush().map_err(|source| PgMakeSchemasError::Io { path: "<notices>".into(), source })?;
            }
        }

        if self.output.is_some() {
            if let Some(mut fd) = self.fd_map.remove(host_name) {
                write_footer(&mut fd)?;
            }
        }

        if self.execute {
            self.con_map.remove(host_name);
        }

        self.host_order.retain(|h| h != host_name);

        Ok(())
    }

    /// Releases any resources still open, in reverse insertion order —
    /// used when a host fails mid-phase and the run aborts early.
    pub fn close(&mut self) {
        for host_name in self.nfd_map.keys().cloned().collect::<Vec<_>>().into_iter().rev() {
            self.nfd_map.remove(&host_name);
        }
        for host_name in self.fd_map.keys().cloned().collect::<Vec<_>>().into_iter().rev() {
            self.fd_map.remove(&host_name);
        }
        for host_name in self.host_order.drain(..).rev().collect::<Vec<_>>() {
            self.con_map.remove(&host_name);
        }
    }
}

#[derive(Debug)]
struct NonUniqueHost;

impl std::fmt::Display for NonUniqueHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "non unique host_name")
    }
}
impl std::error::Error for NonUniqueHost {}

#[derive(Debug)]
struct AnyhowWrap(anyhow::Error);

impl std::fmt::Display for AnyhowWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}
impl std::error::Error for AnyhowWrap {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FragmentInfo, FragmentKind};

    fn fragment(sql: &str) -> Fragment {
        Fragment {
            sql: sql.to_string(),
            info: FragmentInfo { file_path: Some("x.sql".into()), file_path_type: Some(FragmentKind::Regular), pg_role: None, pg_search_path: None },
        }
    }

    #[test]
    fn output_only_mode_writes_header_fragment_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out").to_string_lossy().to_string();

        let mut receivers = Receivers::new(false, false, Some(prefix.clone()));
        let host = Host { name: "db1".into(), host_type: "main".into(), conninfo: None, params: None };

        receivers.begin_host(&host).unwrap();
        assert_eq!(receivers.look_fragment_i("db1"), Some(1));
        receivers.execute("db1", &fragment("select 1;")).unwrap();
        assert_eq!(receivers.look_fragment_i("db1"), Some(2));
        receivers.finish_host("db1").unwrap();

        let content = std::fs::read_to_string(output_path(&prefix, "db1", "main", "sql")).unwrap();
        assert!(content.contains("--begin;"));
        assert!(content.contains("select 1;"));
        assert!(content.contains("fragment 1: ok"));
        assert!(content.contains("--commit;"));
    }

    #[test]
    fn execute_without_conninfo_is_rejected() {
        let mut receivers = Receivers::new(true, false, None);
        let host = Host { name: "db1".into(), host_type: "main".into(), conninfo: None, params: None };
        let err = receivers.begin_host(&host).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn duplicate_host_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out").to_string_lossy().to_string();
        let mut receivers = Receivers::new(false, false, Some(prefix));
        let host = Host { name: "db1".into(), host_type: "main".into(), conninfo: None, params: None };

        receivers.begin_host(&host).unwrap();
        let err = receivers.begin_host(&host).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Receivers);
    }
}
