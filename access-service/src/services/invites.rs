//! Operator management of invite codes. Redemption itself happens inside
//! credential issuance.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};
use std::sync::Arc;
use tracing::instrument;

use super::audit::AuditService;
use super::store::InviteLedger;
use super::ServiceError;
use crate::models::{AuditAction, AuditEvent, InviteCode};

const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const GENERATED_CODE_LEN: usize = 8;

pub fn generate_invite_code() -> String {
    let mut rng = OsRng;
    (0..GENERATED_CODE_LEN)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

fn validate_code(code: &str) -> Result<(), ServiceError> {
    let len = code.chars().count();
    if !(4..=32).contains(&len) {
        return Err(ServiceError::Validation(
            "invite code must be 4-32 characters".to_string(),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ServiceError::Validation(
            "invite code may contain letters, digits, '-' and '_' only".to_string(),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct InviteService {
    ledger: Arc<dyn InviteLedger>,
    audit: AuditService,
}

impl InviteService {
    pub fn new(ledger: Arc<dyn InviteLedger>, audit: AuditService) -> Self {
        Self { ledger, audit }
    }

    #[instrument(skip(self, note))]
    pub async fn create(
        &self,
        code: Option<&str>,
        max_uses: i32,
        expires_utc: Option<DateTime<Utc>>,
        note: Option<String>,
        actor: &str,
    ) -> Result<InviteCode, ServiceError> {
        if max_uses < 1 {
            return Err(ServiceError::Validation(
                "max uses must be at least 1".to_string(),
            ));
        }
        if expires_utc.is_some_and(|at| at <= Utc::now()) {
            return Err(ServiceError::Validation(
                "expiry must be in the future".to_string(),
            ));
        }

        let code = match code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                validate_code(code)?;
                code.to_string()
            }
            None => generate_invite_code(),
        };

        let invite = InviteCode::new(&code, max_uses, expires_utc, note);
        self.ledger.create_invite(&invite).await?;

        self.audit.log_async(
            AuditEvent::new(AuditAction::InviteCreated, actor, Some(invite.code.clone()))
                .with_details(format!("max uses {}", invite.max_uses)),
        );
        tracing::info!(code = %invite.code, max_uses = invite.max_uses, "Invite code created");
        Ok(invite)
    }

    pub async fn list(&self) -> Result<Vec<InviteCode>, ServiceError> {
        Ok(self.ledger.list_invites().await?)
    }

    pub async fn get(&self, code: &str) -> Result<InviteCode, ServiceError> {
        self.ledger
            .find_invite(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("invite code {}", InviteCode::normalize(code))))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, code: &str, actor: &str) -> Result<(), ServiceError> {
        if !self.ledger.delete_invite(code).await? {
            return Err(ServiceError::NotFound(format!(
                "invite code {}",
                InviteCode::normalize(code)
            )));
        }
        self.audit.log_async(AuditEvent::new(
            AuditAction::InviteDeleted,
            actor,
            Some(InviteCode::normalize(code)),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_unambiguous_charset() {
        let code = generate_invite_code();
        assert_eq!(code.len(), GENERATED_CODE_LEN);
        assert!(code.bytes().all(|b| CODE_CHARSET.contains(&b)));
        assert!(validate_code(&code).is_ok());
    }

    #[test]
    fn rejects_bad_codes() {
        assert!(validate_code("abc").is_err());
        assert!(validate_code("WELCOME 1").is_err());
        assert!(validate_code("WELCOME1").is_ok());
    }
}
