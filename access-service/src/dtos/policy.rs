use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::parse_mac;
use crate::models::{
    AuthOutcome, AuthSubject, AuthorizationPolicy, MacAddress, MethodBinding, MethodKind,
    PolicyAttributes, PolicyConditions, PolicyType,
};
use crate::services::{PolicyDraft, ServiceError};

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConditionsDto {
    #[serde(default)]
    #[schema(example = json!(["00:1a:2b:3c:4d:5e"]))]
    pub macs: Vec<String>,
    /// OUI or longer prefixes.
    #[serde(default)]
    #[schema(example = json!(["00:1a:2b"]))]
    pub mac_prefixes: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub network_ids: Vec<String>,
}

impl ConditionsDto {
    fn into_conditions(self) -> Result<PolicyConditions, ServiceError> {
        let macs = self
            .macs
            .iter()
            .map(|m| {
                m.parse::<MacAddress>()
                    .map_err(|e| ServiceError::Validation(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PolicyConditions {
            macs,
            mac_prefixes: self.mac_prefixes,
            usernames: self.usernames,
            groups: self.groups,
            network_ids: self.network_ids,
        })
    }
}

impl From<&PolicyConditions> for ConditionsDto {
    fn from(c: &PolicyConditions) -> Self {
        Self {
            macs: c.macs.iter().map(|m| m.to_string()).collect(),
            mac_prefixes: c.mac_prefixes.clone(),
            usernames: c.usernames.clone(),
            groups: c.groups.clone(),
            network_ids: c.network_ids.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PolicyRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    #[schema(example = "staff-vlan")]
    pub name: String,

    pub policy_type: PolicyType,

    /// Lower wins.
    #[validate(range(min = 0, message = "Priority must not be negative"))]
    #[schema(example = 10)]
    pub priority: i32,

    #[serde(default)]
    pub attributes: PolicyAttributes,

    #[serde(default)]
    pub conditions: ConditionsDto,

    #[serde(default = "default_active")]
    pub active: bool,
}

impl PolicyRequest {
    pub fn into_draft(self) -> Result<PolicyDraft, ServiceError> {
        Ok(PolicyDraft {
            name: self.name.trim().to_string(),
            policy_type: self.policy_type,
            priority: self.priority,
            attributes: self.attributes,
            conditions: self.conditions.into_conditions()?,
            active: self.active,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PolicyResponse {
    pub policy_id: i64,
    pub name: String,
    pub policy_type: PolicyType,
    pub priority: i32,
    pub attributes: PolicyAttributes,
    pub conditions: ConditionsDto,
    pub active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_utc: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_utc: DateTime<Utc>,
}

impl From<AuthorizationPolicy> for PolicyResponse {
    fn from(p: AuthorizationPolicy) -> Self {
        Self {
            conditions: ConditionsDto::from(&p.conditions),
            policy_id: p.policy_id,
            name: p.name,
            policy_type: p.policy_type,
            priority: p.priority,
            attributes: p.attributes,
            active: p.active,
            created_utc: p.created_utc,
            updated_utc: p.updated_utc,
        }
    }
}

/// The authenticating client, as reported by the RADIUS boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubjectDto {
    #[schema(example = "00:1a:2b:3c:4d:5e")]
    pub mac: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub network_id: Option<String>,
    pub registered: Option<bool>,
}

impl SubjectDto {
    pub fn into_subject(self) -> Result<AuthSubject, ServiceError> {
        Ok(AuthSubject {
            mac: parse_mac(self.mac.as_deref())?,
            username: self.username,
            groups: self.groups,
            network_id: self.network_id,
            registered: self.registered,
        })
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AuthorizeRequest {
    #[validate(length(min = 1, max = 64, message = "Method id must be 1-64 characters"))]
    #[schema(example = "eap-tls")]
    pub method_id: String,
    pub outcome: AuthOutcome,
    #[serde(default)]
    pub subject: SubjectDto,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BindingRequest {
    /// Taken from the path on update.
    #[validate(length(min = 1, max = 64, message = "Method id must be 1-64 characters"))]
    #[schema(example = "eap-tls")]
    pub method_id: Option<String>,
    pub method_kind: MethodKind,
    pub success_policy_id: Option<i64>,
    pub failure_policy_id: Option<i64>,
    pub registered_policy_id: Option<i64>,
    pub unregistered_policy_id: Option<i64>,
    /// Conditional policies that may refine the success/registered slots.
    #[serde(default)]
    pub conditional_policy_ids: Vec<i64>,
}

impl BindingRequest {
    pub fn into_binding(self, method_id: Option<String>) -> Result<MethodBinding, ServiceError> {
        let method_id = method_id
            .or(self.method_id)
            .ok_or_else(|| ServiceError::Validation("method id is required".to_string()))?;
        Ok(MethodBinding {
            method_id,
            method_kind: self.method_kind,
            success_policy_id: self.success_policy_id,
            failure_policy_id: self.failure_policy_id,
            registered_policy_id: self.registered_policy_id,
            unregistered_policy_id: self.unregistered_policy_id,
            conditional_policy_ids: self.conditional_policy_ids,
            updated_utc: Utc::now(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BindingResponse {
    pub method_id: String,
    pub method_kind: MethodKind,
    pub success_policy_id: Option<i64>,
    pub failure_policy_id: Option<i64>,
    pub registered_policy_id: Option<i64>,
    pub unregistered_policy_id: Option<i64>,
    pub conditional_policy_ids: Vec<i64>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_utc: DateTime<Utc>,
}

impl From<MethodBinding> for BindingResponse {
    fn from(b: MethodBinding) -> Self {
        Self {
            method_id: b.method_id,
            method_kind: b.method_kind,
            success_policy_id: b.success_policy_id,
            failure_policy_id: b.failure_policy_id,
            registered_policy_id: b.registered_policy_id,
            unregistered_policy_id: b.unregistered_policy_id,
            conditional_policy_ids: b.conditional_policy_ids,
            updated_utc: b.updated_utc,
        }
    }
}
