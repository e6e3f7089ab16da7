// ABOUTME: Liveness reporter - posts the process name to the monitoring endpoint on a fixed interval
// ABOUTME: Runs as its own task with its own error dedup; failures never reach the sync loop

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::HeartbeatConfig;
use crate::sync::DedupChannel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatPayload {
    pub pc_name: String,
}

pub fn heartbeat_url(base_url: &str) -> String {
    format!("{}/api/heartbeat", base_url.trim_end_matches('/'))
}

pub struct Heartbeat {
    client: Client,
    url: String,
    payload: HeartbeatPayload,
    config: HeartbeatConfig,
    errors: DedupChannel,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig, process_name: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: heartbeat_url(&config.base_url),
            payload: HeartbeatPayload {
                pc_name: process_name.to_string(),
            },
            config,
            errors: DedupChannel::new(),
        })
    }

    /// Send one heartbeat. Non-2xx responses count as failures.
    pub async fn send(&self) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&self.payload)
            .send()
            .await
            .with_context(|| format!("Failed to send heartbeat to {}", self.url))?
            .error_for_status()
            .context("Heartbeat rejected")?;
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            "Sending heartbeat to {} every {:?}",
            self.url,
            self.config.interval
        );

        loop {
            match self.send().await {
                Ok(()) => {
                    if self.errors.clear() {
                        tracing::info!("Heartbeat delivered again");
                    }
                }
                Err(e) => {
                    let raw = format!("{:#}", e);
                    if self.errors.should_emit(&raw) {
                        tracing::warn!("Heartbeat failed: {}", raw);
                    }
                }
            }

            tokio::select! {
                biased;

                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
