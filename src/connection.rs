//! Database connection helper: tries an SSL connection first, falling back
//! to plaintext, from a host's manifest-declared `conninfo` string.

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres::Client;
use postgres_native_tls::MakeTlsConnector;

fn make_tls_connector() -> Result<MakeTlsConnector> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .context("failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

/// Connects to `conninfo`, preferring TLS and falling back to a plaintext
/// connection if either the TLS handshake or the connector itself fails —
/// matching `sslmode=prefer` semantics.
pub fn connect_database(conninfo: &str) -> Result<Client> {
    let config: postgres::Config = conninfo.parse().context("invalid conninfo")?;

    match make_tls_connector() {
        Ok(tls) => match config.connect(tls) {
            Ok(client) => Ok(client),
            Err(_) => config.connect(postgres::NoTls).context("failed to connect to database"),
        },
        Err(_) => config.connect(postgres::NoTls).context("failed to connect to database"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_conninfo() {
        let err = match connect_database("not a conninfo") {
            Err(e) => e,
            Ok(_) => panic!("expected connect_database to reject a malformed conninfo"),
        };
        assert!(format!("{err:#}").contains("invalid conninfo"));
    }

    #[test]
    #[serial_test::serial]
    #[ignore]
    fn connects_to_a_live_server() {
        let url = std::env::var("PG_URL").unwrap_or_else(|_| "postgres://postgres@localhost:5432/postgres".to_string());
        connect_database(&url).unwrap();
    }
}
