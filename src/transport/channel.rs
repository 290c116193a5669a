//! Delivery channels to the remote collector.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::message::WireMessage;
use crate::error::{Result, SweepError};

/// A lossy connection to the collector.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Deliver one message. Any error means the message was not delivered.
    async fn send(&self, message: &WireMessage) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) {}
}

/// Posts each message as JSON to a collector endpoint.
///
/// HTTP has no persistent connection; "connected" means the last exchange
/// with the collector succeeded.
pub struct HttpChannel {
    client: reqwest::Client,
    endpoint: String,
    connected: AtomicBool,
}

impl HttpChannel {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            connected: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn connect(&self) -> Result<()> {
        let response = self.client.head(&self.endpoint).send().await;
        match response {
            // Any answer from the server means it is reachable
            Ok(r) if !r.status().is_server_error() => {
                self.connected.store(true, Ordering::Release);
                Ok(())
            }
            Ok(r) => {
                self.connected.store(false, Ordering::Release);
                Err(SweepError::Transport(format!(
                    "Collector unavailable: HTTP {}",
                    r.status()
                )))
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    async fn send(&self, message: &WireMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(SweepError::Transport("Not connected".to_string()));
        }

        let result = self.client.post(&self.endpoint).json(message).send().await;
        match result {
            Ok(r) if r.status().is_success() => Ok(()),
            Ok(r) => {
                if r.status().is_server_error() {
                    self.connected.store(false, Ordering::Release);
                }
                Err(SweepError::Transport(format!(
                    "Collector rejected message: HTTP {}",
                    r.status()
                )))
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
