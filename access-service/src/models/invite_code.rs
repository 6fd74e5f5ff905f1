use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCode {
    /// Stored upper-cased; lookups normalise the same way.
    pub code: String,
    pub max_uses: i32,
    pub uses: i32,
    pub expires_utc: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl InviteCode {
    pub fn new(
        code: &str,
        max_uses: i32,
        expires_utc: Option<DateTime<Utc>>,
        note: Option<String>,
    ) -> Self {
        Self {
            code: Self::normalize(code),
            max_uses,
            uses: 0,
            expires_utc,
            note,
            created_utc: Utc::now(),
        }
    }

    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.uses < self.max_uses && self.expires_utc.is_none_or(|at| at > now)
    }

    pub fn remaining_uses(&self) -> i32 {
        (self.max_uses - self.uses).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn codes_are_case_insensitive() {
        let invite = InviteCode::new(" welcome-24 ", 3, None, None);
        assert_eq!(invite.code, "WELCOME-24");
        assert_eq!(InviteCode::normalize("Welcome-24"), invite.code);
    }

    #[test]
    fn redeemable_until_exhausted_or_expired() {
        let now = Utc::now();
        let mut invite = InviteCode::new("A", 1, Some(now + Duration::hours(1)), None);
        assert!(invite.is_redeemable_at(now));
        invite.uses = 1;
        assert!(!invite.is_redeemable_at(now));
        assert_eq!(invite.remaining_uses(), 0);

        let stale = InviteCode::new("B", 5, Some(now - Duration::seconds(1)), None);
        assert!(!stale.is_redeemable_at(now));
    }
}
