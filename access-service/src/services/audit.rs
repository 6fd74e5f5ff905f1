//! Audit trail for operator and credential actions.

use std::sync::Arc;

use super::store::AuditLog;
use super::ServiceError;
use crate::models::AuditEvent;

#[derive(Clone)]
pub struct AuditService {
    log: Arc<dyn AuditLog>,
}

impl AuditService {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    /// Write an event and wait for it. Callers that must not proceed
    /// without an audit record (secret reveal) use this.
    pub async fn log(&self, event: AuditEvent) -> Result<(), ServiceError> {
        tracing::info!(
            action = event.action.as_str(),
            actor = %event.actor,
            target = ?event.target,
            "Audit event"
        );
        self.log.record(&event).await.map_err(|e| {
            tracing::error!(error = %e, action = event.action.as_str(), "Failed to write audit event");
            ServiceError::from(e)
        })
    }

    /// Write an event in the background; failures are only logged.
    pub fn log_async(&self, event: AuditEvent) {
        let log = self.log.clone();
        tokio::spawn(async move {
            if let Err(e) = log.record(&event).await {
                tracing::error!(
                    error = %e,
                    action = event.action.as_str(),
                    "Failed to write audit event"
                );
            }
        });
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEvent>, ServiceError> {
        Ok(self.log.list_events(limit).await?)
    }
}
