use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Eap,
    MacBypass,
    Psk,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Eap => "eap",
            MethodKind::MacBypass => "mac_bypass",
            MethodKind::Psk => "psk",
        }
    }
}

impl FromStr for MethodKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eap" => Ok(MethodKind::Eap),
            "mac_bypass" => Ok(MethodKind::MacBypass),
            "psk" => Ok(MethodKind::Psk),
            other => Err(anyhow::anyhow!("unknown method kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    Success,
    Failure,
}

/// Which policy applies for each outcome of an authentication method.
/// Saving a binding for an existing method id replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodBinding {
    pub method_id: String,
    pub method_kind: MethodKind,
    pub success_policy_id: Option<i64>,
    /// No failure policy means the failure is denied with no attributes.
    pub failure_policy_id: Option<i64>,
    pub registered_policy_id: Option<i64>,
    pub unregistered_policy_id: Option<i64>,
    /// Policies with subject conditions that may refine an accepting slot of
    /// this method. Policies not listed here never apply to it.
    #[serde(default)]
    pub conditional_policy_ids: Vec<i64>,
    pub updated_utc: DateTime<Utc>,
}

impl MethodBinding {
    pub fn references(&self, policy_id: i64) -> bool {
        [
            self.success_policy_id,
            self.failure_policy_id,
            self.registered_policy_id,
            self.unregistered_policy_id,
        ]
        .contains(&Some(policy_id))
            || self.conditional_policy_ids.contains(&policy_id)
    }
}
