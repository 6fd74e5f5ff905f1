//! Background expiry sweep.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::issuer::CredentialIssuer;

pub struct ExpirySweeper {
    issuer: CredentialIssuer,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl ExpirySweeper {
    pub fn new(issuer: CredentialIssuer, interval: Duration) -> Self {
        Self {
            issuer,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the sweep loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting expiry sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Expiry sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.issuer.sweep_expired().await {
                            tracing::error!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }
        })
    }
}
