// ABOUTME: PostgreSQL connection setup with TLS support
// ABOUTME: Self-signed certificates are accepted only when explicitly allowed

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::Client;

use crate::utils::strip_password_from_url;

static ALLOW_SELF_SIGNED: AtomicBool = AtomicBool::new(false);

/// Set the process-wide TLS policy. Called once at startup.
pub fn init_tls_policy(allow_self_signed_certs: bool) {
    ALLOW_SELF_SIGNED.store(allow_self_signed_certs, Ordering::Relaxed);
    if allow_self_signed_certs {
        tracing::warn!("TLS certificate verification is disabled for PostgreSQL connections");
    }
}

fn make_tls() -> Result<MakeTlsConnector> {
    let allow_self_signed = ALLOW_SELF_SIGNED.load(Ordering::Relaxed);
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed)
        .danger_accept_invalid_hostnames(allow_self_signed)
        .build()
        .context("Failed to build TLS connector")?;
    Ok(MakeTlsConnector::new(connector))
}

/// A client together with the task driving its connection.
pub struct PgConnection {
    pub client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    /// Drop the client and wait for the connection task to finish.
    pub async fn close(self) {
        let PgConnection { client, driver } = self;
        drop(client);
        if let Err(e) = driver.await {
            tracing::warn!("PostgreSQL connection task ended abnormally: {}", e);
        }
    }
}

/// Connect to PostgreSQL, negotiating TLS as the URL's `sslmode` requests.
pub async fn connect(url: &str) -> Result<PgConnection> {
    let tls = make_tls()?;
    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to PostgreSQL at {}",
                strip_password_from_url(url)
            )
        })?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(PgConnection { client, driver })
}
