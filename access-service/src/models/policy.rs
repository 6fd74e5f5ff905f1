use super::MacAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    User,
    Group,
    Device,
    Network,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::User => "user",
            PolicyType::Group => "group",
            PolicyType::Device => "device",
            PolicyType::Network => "network",
        }
    }
}

impl FromStr for PolicyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PolicyType::User),
            "group" => Ok(PolicyType::Group),
            "device" => Ok(PolicyType::Device),
            "network" => Ok(PolicyType::Network),
            other => Err(anyhow::anyhow!("unknown policy type: {}", other)),
        }
    }
}

/// Network attributes handed to the access fabric when a policy wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PolicyAttributes {
    pub vlan_id: Option<u16>,
    pub vlan_name: Option<String>,
    pub bandwidth_up_kbps: Option<u32>,
    pub bandwidth_down_kbps: Option<u32>,
    pub session_timeout_secs: Option<u32>,
    pub idle_timeout_secs: Option<u32>,
    pub security_group_tag: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RadiusAttribute {
    pub name: String,
    pub value: String,
}

impl RadiusAttribute {
    fn new(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl PolicyAttributes {
    pub fn is_empty(&self) -> bool {
        self == &PolicyAttributes::default()
    }

    /// RADIUS Access-Accept pairs for these attributes. VLAN assignment uses
    /// the RFC 3580 tunnel triplet; the group id is the VLAN name when set.
    pub fn radius_pairs(&self) -> Vec<RadiusAttribute> {
        let mut pairs = Vec::new();

        let group_id = self
            .vlan_name
            .clone()
            .or_else(|| self.vlan_id.map(|id| id.to_string()));
        if let Some(group_id) = group_id {
            pairs.push(RadiusAttribute::new("Tunnel-Type", "VLAN"));
            pairs.push(RadiusAttribute::new("Tunnel-Medium-Type", "IEEE-802"));
            pairs.push(RadiusAttribute::new("Tunnel-Private-Group-Id", group_id));
        }
        if let Some(timeout) = self.session_timeout_secs {
            pairs.push(RadiusAttribute::new("Session-Timeout", timeout));
        }
        if let Some(timeout) = self.idle_timeout_secs {
            pairs.push(RadiusAttribute::new("Idle-Timeout", timeout));
        }
        // WISPr values are bits per second.
        if let Some(up) = self.bandwidth_up_kbps {
            pairs.push(RadiusAttribute::new(
                "WISPr-Bandwidth-Max-Up",
                u64::from(up) * 1000,
            ));
        }
        if let Some(down) = self.bandwidth_down_kbps {
            pairs.push(RadiusAttribute::new(
                "WISPr-Bandwidth-Max-Down",
                u64::from(down) * 1000,
            ));
        }
        if let Some(tag) = self.security_group_tag {
            pairs.push(RadiusAttribute::new(
                "Cisco-AVPair",
                format!("cts:security-group-tag={:04x}-00", tag),
            ));
        }
        pairs
    }
}

/// The facts about an authenticating client that policies match against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSubject {
    pub mac: Option<MacAddress>,
    pub username: Option<String>,
    pub groups: Vec<String>,
    pub network_id: Option<String>,
    /// MAC-bypass only: whether the device holds a registration.
    pub registered: Option<bool>,
}

/// Subject criteria. Each non-empty list must match (any element); empty
/// lists are ignored. A policy with no criteria never matches on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(default)]
    pub macs: Vec<MacAddress>,
    #[serde(default)]
    pub mac_prefixes: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub network_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionMatch {
    pub matches: bool,
    pub reason: String,
}

impl ConditionMatch {
    fn miss(reason: impl Into<String>) -> Self {
        Self {
            matches: false,
            reason: reason.into(),
        }
    }
}

impl PolicyConditions {
    pub fn is_empty(&self) -> bool {
        self.macs.is_empty()
            && self.mac_prefixes.is_empty()
            && self.usernames.is_empty()
            && self.groups.is_empty()
            && self.network_ids.is_empty()
    }

    pub fn evaluate(&self, subject: &AuthSubject) -> ConditionMatch {
        if self.is_empty() {
            return ConditionMatch::miss("policy has no conditions");
        }

        let mut matched = Vec::new();

        if !self.macs.is_empty() || !self.mac_prefixes.is_empty() {
            let Some(mac) = subject.mac else {
                return ConditionMatch::miss("subject has no MAC address");
            };
            let exact = self.macs.contains(&mac);
            let prefixed = self.mac_prefixes.iter().any(|p| mac.has_prefix(p));
            if !exact && !prefixed {
                return ConditionMatch::miss(format!("MAC {} not listed", mac));
            }
            matched.push("mac");
        }

        if !self.usernames.is_empty() {
            let Some(username) = subject.username.as_deref() else {
                return ConditionMatch::miss("subject has no username");
            };
            if !self
                .usernames
                .iter()
                .any(|u| u.eq_ignore_ascii_case(username))
            {
                return ConditionMatch::miss(format!("username {} not listed", username));
            }
            matched.push("username");
        }

        if !self.groups.is_empty() {
            let hit = subject
                .groups
                .iter()
                .any(|g| self.groups.iter().any(|want| want.eq_ignore_ascii_case(g)));
            if !hit {
                return ConditionMatch::miss("no listed group membership");
            }
            matched.push("group");
        }

        if !self.network_ids.is_empty() {
            let Some(network_id) = subject.network_id.as_deref() else {
                return ConditionMatch::miss("subject has no network id");
            };
            if !self.network_ids.iter().any(|n| n == network_id) {
                return ConditionMatch::miss(format!("network {} not listed", network_id));
            }
            matched.push("network");
        }

        ConditionMatch {
            matches: true,
            reason: format!("matched on {}", matched.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationPolicy {
    pub policy_id: i64,
    pub name: String,
    pub policy_type: PolicyType,
    /// Lower wins; ties go to the lower id.
    pub priority: i32,
    pub attributes: PolicyAttributes,
    pub conditions: PolicyConditions,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl AuthorizationPolicy {
    /// Ordering key: priority ascending, then id ascending.
    pub fn rank(&self) -> (i32, i64) {
        (self.priority, self.policy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> AuthSubject {
        AuthSubject {
            mac: Some("00:1a:2b:3c:4d:5e".parse().unwrap()),
            username: Some("Alice".to_string()),
            groups: vec!["staff".to_string()],
            network_id: Some("corp".to_string()),
            registered: None,
        }
    }

    #[test]
    fn all_non_empty_criteria_must_match() {
        let conditions = PolicyConditions {
            mac_prefixes: vec!["00:1A:2B".to_string()],
            groups: vec!["STAFF".to_string()],
            ..Default::default()
        };
        assert!(conditions.evaluate(&subject()).matches);

        let conditions = PolicyConditions {
            mac_prefixes: vec!["00:1A:2B".to_string()],
            network_ids: vec!["guest".to_string()],
            ..Default::default()
        };
        let outcome = conditions.evaluate(&subject());
        assert!(!outcome.matches);
        assert!(outcome.reason.contains("network"));
    }

    #[test]
    fn empty_conditions_never_match() {
        assert!(!PolicyConditions::default().evaluate(&subject()).matches);
    }

    #[test]
    fn radius_pairs_cover_vlan_and_bandwidth() {
        let attributes = PolicyAttributes {
            vlan_id: Some(20),
            bandwidth_down_kbps: Some(5_000),
            session_timeout_secs: Some(3600),
            ..Default::default()
        };
        let pairs = attributes.radius_pairs();
        let find = |name: &str| {
            pairs
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
        };
        assert_eq!(find("Tunnel-Private-Group-Id").as_deref(), Some("20"));
        assert_eq!(find("WISPr-Bandwidth-Max-Down").as_deref(), Some("5000000"));
        assert_eq!(find("Session-Timeout").as_deref(), Some("3600"));
        assert!(find("Idle-Timeout").is_none());
        assert!(PolicyAttributes::default().radius_pairs().is_empty());
    }
}
