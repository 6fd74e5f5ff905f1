use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{AuditAction, AuditEvent};

pub const DEFAULT_AUDIT_LIMIT: i64 = 100;
pub const MAX_AUDIT_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct AuditListQuery {
    /// Newest events first; 1-500, default 100.
    pub limit: Option<i64>,
}

impl AuditListQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditEventResponse {
    pub event_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub target: Option<String>,
    pub details: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_utc: DateTime<Utc>,
}

impl From<AuditEvent> for AuditEventResponse {
    fn from(e: AuditEvent) -> Self {
        Self {
            event_id: e.event_id,
            action: e.action,
            actor: e.actor,
            target: e.target,
            details: e.details,
            created_utc: e.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(AuditListQuery::default().limit(), DEFAULT_AUDIT_LIMIT);
        assert_eq!(AuditListQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(AuditListQuery { limit: Some(10_000) }.limit(), MAX_AUDIT_LIMIT);
        assert_eq!(AuditListQuery { limit: Some(25) }.limit(), 25);
    }
}
