//! Policy Resolver: maps an authentication event to the network attributes
//! the access fabric should apply. Resolution never writes to the store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

use super::audit::AuditService;
use super::metrics;
use super::store::{PolicyDraft, PolicyStore};
use super::ServiceError;
use crate::models::{
    AuditAction, AuditEvent, AuthOutcome, AuthSubject, AuthorizationPolicy, MethodBinding,
    MethodKind, PolicyAttributes, RadiusAttribute,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resolution {
    pub decision: Decision,
    pub policy_id: Option<i64>,
    pub policy_name: Option<String>,
    pub attributes: PolicyAttributes,
    pub radius_attributes: Vec<RadiusAttribute>,
    pub reason: String,
}

impl Resolution {
    fn empty(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            policy_id: None,
            policy_name: None,
            attributes: PolicyAttributes::default(),
            radius_attributes: Vec::new(),
            reason: reason.into(),
        }
    }

    fn from_policy(policy: &AuthorizationPolicy, reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Accept,
            policy_id: Some(policy.policy_id),
            policy_name: Some(policy.name.clone()),
            radius_attributes: policy.attributes.radius_pairs(),
            attributes: policy.attributes.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PolicyTest {
    pub matches: bool,
    pub policy_name: Option<String>,
    pub reason: Option<String>,
}

/// Which binding slot applies to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Success,
    Failure,
    Registered,
    Unregistered,
}

impl Slot {
    fn for_outcome(outcome: AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::Success => Slot::Success,
            AuthOutcome::Failure => Slot::Failure,
        }
    }

    /// MAC-bypass registration slot for the subject, when one is configured.
    fn registration(binding: &MethodBinding, subject: &AuthSubject) -> Option<Self> {
        if binding.method_kind != MethodKind::MacBypass {
            return None;
        }
        match subject.registered {
            Some(true) if binding.registered_policy_id.is_some() => Some(Slot::Registered),
            Some(false) if binding.unregistered_policy_id.is_some() => Some(Slot::Unregistered),
            _ => None,
        }
    }

    /// Slots whose bound policy may be outranked by a listed conditional
    /// policy.
    fn refinable(&self) -> bool {
        matches!(self, Slot::Success | Slot::Registered)
    }

    fn policy_id(&self, binding: &MethodBinding) -> Option<i64> {
        match self {
            Slot::Success => binding.success_policy_id,
            Slot::Failure => binding.failure_policy_id,
            Slot::Registered => binding.registered_policy_id,
            Slot::Unregistered => binding.unregistered_policy_id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Slot::Success => "success",
            Slot::Failure => "failure",
            Slot::Registered => "registered",
            Slot::Unregistered => "unregistered",
        }
    }
}

/// Lowest priority wins; equal priorities go to the lowest id.
pub fn pick_winner<'a>(
    candidates: impl IntoIterator<Item = &'a AuthorizationPolicy>,
) -> Option<&'a AuthorizationPolicy> {
    candidates.into_iter().min_by_key(|p| p.rank())
}

#[derive(Clone)]
pub struct PolicyResolver {
    policies: Arc<dyn PolicyStore>,
    audit: AuditService,
}

impl PolicyResolver {
    pub fn new(policies: Arc<dyn PolicyStore>, audit: AuditService) -> Self {
        Self { policies, audit }
    }

    #[instrument(skip(self, subject), fields(mac = ?subject.mac))]
    pub async fn resolve(
        &self,
        method_id: &str,
        outcome: AuthOutcome,
        subject: &AuthSubject,
    ) -> Result<Resolution, ServiceError> {
        let resolution = self.resolve_inner(method_id, outcome, subject).await?;
        metrics::record_policy_resolution(resolution.decision.as_str());
        tracing::debug!(
            decision = resolution.decision.as_str(),
            policy_id = ?resolution.policy_id,
            reason = %resolution.reason,
            "Policy resolved"
        );
        Ok(resolution)
    }

    async fn resolve_inner(
        &self,
        method_id: &str,
        outcome: AuthOutcome,
        subject: &AuthSubject,
    ) -> Result<Resolution, ServiceError> {
        let Some(binding) = self.policies.find_binding(method_id).await? else {
            return Ok(match outcome {
                AuthOutcome::Success => {
                    Resolution::empty(Decision::Accept, "method has no binding")
                }
                AuthOutcome::Failure => {
                    Resolution::empty(Decision::Reject, "method has no binding")
                }
            });
        };

        // A registration slot whose policy is missing or inactive is absent,
        // so the outcome slot decides.
        let mut slot = Slot::for_outcome(outcome);
        let mut bound = None;
        if let Some(registration) = Slot::registration(&binding, subject) {
            bound = self.active_policy(registration.policy_id(&binding)).await?;
            if bound.is_some() {
                slot = registration;
            }
        }
        if bound.is_none() {
            bound = self.active_policy(slot.policy_id(&binding)).await?;
        }

        if slot == Slot::Failure {
            return Ok(match bound {
                Some(policy) => Resolution::from_policy(&policy, "failure policy"),
                None => Resolution::empty(Decision::Reject, "no active failure policy"),
            });
        }

        let mut matched = Vec::new();
        if slot.refinable() {
            for &policy_id in &binding.conditional_policy_ids {
                if let Some(policy) = self.active_policy(Some(policy_id)).await? {
                    if !policy.conditions.is_empty()
                        && policy.conditions.evaluate(subject).matches
                    {
                        matched.push(policy);
                    }
                }
            }
        }

        let winner = pick_winner(bound.iter().chain(matched.iter()));
        Ok(match winner {
            Some(policy) if bound.as_ref().is_some_and(|b| b.policy_id == policy.policy_id) => {
                Resolution::from_policy(policy, format!("{} policy", slot.name()))
            }
            Some(policy) => Resolution::from_policy(policy, "matched policy conditions"),
            None => Resolution::empty(
                Decision::Accept,
                format!("no active {} policy", slot.name()),
            ),
        })
    }

    async fn active_policy(
        &self,
        policy_id: Option<i64>,
    ) -> Result<Option<AuthorizationPolicy>, ServiceError> {
        let Some(policy_id) = policy_id else {
            return Ok(None);
        };
        Ok(self
            .policies
            .find_policy(policy_id)
            .await?
            .filter(|p| p.active))
    }

    /// Operator diagnostic: would `policy_id` match `subject`? Read-only.
    pub async fn test(
        &self,
        policy_id: i64,
        subject: &AuthSubject,
    ) -> Result<PolicyTest, ServiceError> {
        let policy = self
            .policies
            .find_policy(policy_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("policy {}", policy_id)))?;

        if !policy.active {
            return Ok(PolicyTest {
                matches: false,
                policy_name: Some(policy.name),
                reason: Some("policy is inactive".to_string()),
            });
        }

        let outcome = policy.conditions.evaluate(subject);
        Ok(PolicyTest {
            matches: outcome.matches,
            policy_name: Some(policy.name),
            reason: Some(outcome.reason),
        })
    }

    pub async fn get_policy(&self, policy_id: i64) -> Result<AuthorizationPolicy, ServiceError> {
        self.policies
            .find_policy(policy_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("policy {}", policy_id)))
    }

    pub async fn list_policies(&self) -> Result<Vec<AuthorizationPolicy>, ServiceError> {
        Ok(self.policies.list_policies().await?)
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_policy(
        &self,
        draft: PolicyDraft,
        actor: &str,
    ) -> Result<AuthorizationPolicy, ServiceError> {
        validate_draft(&draft)?;
        let policy = self.policies.insert_policy(&draft).await?;
        self.audit.log_async(
            AuditEvent::new(
                AuditAction::PolicyChanged,
                actor,
                Some(policy.policy_id.to_string()),
            )
            .with_details(format!("created {}", policy.name)),
        );
        Ok(policy)
    }

    #[instrument(skip(self, draft))]
    pub async fn update_policy(
        &self,
        policy_id: i64,
        draft: PolicyDraft,
        actor: &str,
    ) -> Result<AuthorizationPolicy, ServiceError> {
        validate_draft(&draft)?;
        let policy = self
            .policies
            .update_policy(policy_id, &draft)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("policy {}", policy_id)))?;
        self.audit.log_async(
            AuditEvent::new(AuditAction::PolicyChanged, actor, Some(policy_id.to_string()))
                .with_details(format!("updated {}", policy.name)),
        );
        Ok(policy)
    }

    /// Refused while a method binding still points at the policy.
    #[instrument(skip(self))]
    pub async fn delete_policy(&self, policy_id: i64, actor: &str) -> Result<(), ServiceError> {
        if !self.policies.delete_policy(policy_id).await? {
            return Err(ServiceError::NotFound(format!("policy {}", policy_id)));
        }
        self.audit.log_async(
            AuditEvent::new(AuditAction::PolicyChanged, actor, Some(policy_id.to_string()))
                .with_details("deleted"),
        );
        Ok(())
    }

    pub async fn get_binding(&self, method_id: &str) -> Result<MethodBinding, ServiceError> {
        self.policies
            .find_binding(method_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("method binding {}", method_id)))
    }

    pub async fn list_bindings(&self) -> Result<Vec<MethodBinding>, ServiceError> {
        Ok(self.policies.list_bindings().await?)
    }

    /// Create or replace the binding for `binding.method_id`.
    #[instrument(skip(self, binding), fields(method_id = %binding.method_id))]
    pub async fn save_binding(
        &self,
        mut binding: MethodBinding,
        actor: &str,
    ) -> Result<MethodBinding, ServiceError> {
        binding.method_id = binding.method_id.trim().to_string();
        if binding.method_id.is_empty() {
            return Err(ServiceError::Validation("method id is required".to_string()));
        }
        if binding.method_kind != MethodKind::MacBypass
            && (binding.registered_policy_id.is_some() || binding.unregistered_policy_id.is_some())
        {
            return Err(ServiceError::Validation(
                "registered/unregistered policies apply to MAC-bypass bindings only".to_string(),
            ));
        }

        for policy_id in [
            binding.success_policy_id,
            binding.failure_policy_id,
            binding.registered_policy_id,
            binding.unregistered_policy_id,
        ]
        .into_iter()
        .flatten()
        {
            if self.policies.find_policy(policy_id).await?.is_none() {
                return Err(ServiceError::Validation(format!(
                    "policy {} does not exist",
                    policy_id
                )));
            }
        }

        binding.conditional_policy_ids.sort_unstable();
        binding.conditional_policy_ids.dedup();
        for &policy_id in &binding.conditional_policy_ids {
            match self.policies.find_policy(policy_id).await? {
                None => {
                    return Err(ServiceError::Validation(format!(
                        "policy {} does not exist",
                        policy_id
                    )))
                }
                Some(policy) if policy.conditions.is_empty() => {
                    return Err(ServiceError::Validation(format!(
                        "policy {} has no conditions to match on",
                        policy_id
                    )))
                }
                Some(_) => {}
            }
        }

        binding.updated_utc = chrono::Utc::now();
        self.policies.save_binding(&binding).await?;
        self.audit.log_async(
            AuditEvent::new(
                AuditAction::BindingChanged,
                actor,
                Some(binding.method_id.clone()),
            )
            .with_details(format!("kind {}", binding.method_kind.as_str())),
        );
        Ok(binding)
    }

    pub async fn delete_binding(&self, method_id: &str, actor: &str) -> Result<(), ServiceError> {
        if !self.policies.delete_binding(method_id).await? {
            return Err(ServiceError::NotFound(format!("method binding {}", method_id)));
        }
        self.audit.log_async(
            AuditEvent::new(
                AuditAction::BindingChanged,
                actor,
                Some(method_id.to_string()),
            )
            .with_details("deleted"),
        );
        Ok(())
    }
}

fn validate_draft(draft: &PolicyDraft) -> Result<(), ServiceError> {
    if draft.name.trim().is_empty() {
        return Err(ServiceError::Validation("policy name is required".to_string()));
    }
    if draft.attributes.vlan_id.is_some_and(|v| v == 0 || v > 4094) {
        return Err(ServiceError::Validation(
            "vlan id must be between 1 and 4094".to_string(),
        ));
    }
    for prefix in &draft.conditions.mac_prefixes {
        let digits = prefix.chars().filter(|c| c.is_ascii_hexdigit()).count();
        if digits == 0 || digits > 12 {
            return Err(ServiceError::Validation(format!(
                "invalid MAC prefix: {}",
                prefix
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PolicyConditions, PolicyType};
    use chrono::Utc;

    fn policy(id: i64, priority: i32) -> AuthorizationPolicy {
        AuthorizationPolicy {
            policy_id: id,
            name: format!("p{}", id),
            policy_type: PolicyType::Device,
            priority,
            attributes: PolicyAttributes::default(),
            conditions: PolicyConditions::default(),
            active: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn lowest_priority_then_lowest_id_wins() {
        let policies = [policy(3, 20), policy(2, 10), policy(1, 10)];
        assert_eq!(pick_winner(policies.iter()).map(|p| p.policy_id), Some(1));
        assert!(pick_winner(std::iter::empty()).is_none());
    }

    #[test]
    fn mac_bypass_branches_on_registration_when_slot_set() {
        let binding = MethodBinding {
            method_id: "mab".to_string(),
            method_kind: MethodKind::MacBypass,
            success_policy_id: Some(1),
            failure_policy_id: None,
            registered_policy_id: Some(2),
            unregistered_policy_id: None,
            conditional_policy_ids: Vec::new(),
            updated_utc: Utc::now(),
        };
        let registered = AuthSubject {
            registered: Some(true),
            ..Default::default()
        };
        let unregistered = AuthSubject {
            registered: Some(false),
            ..Default::default()
        };
        assert_eq!(
            Slot::registration(&binding, &registered),
            Some(Slot::Registered)
        );
        assert_eq!(Slot::registration(&binding, &unregistered), None);
        assert!(!Slot::Unregistered.refinable());
        assert!(Slot::Registered.refinable());
    }
}
