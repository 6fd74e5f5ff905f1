//! Authorization policy resolution and administration.

mod common;

use access_service::models::{
    AuthOutcome, AuthSubject, MethodBinding, MethodKind, PolicyAttributes, PolicyConditions,
    PolicyType, RegistrationMode,
};
use access_service::services::{Decision, PolicyDraft, ServiceError};
use axum::http::StatusCode;
use chrono::Utc;
use common::TestApp;
use serde_json::json;

fn draft(name: &str, priority: i32, vlan: u16, groups: &[&str]) -> PolicyDraft {
    PolicyDraft {
        name: name.to_string(),
        policy_type: PolicyType::Group,
        priority,
        attributes: PolicyAttributes {
            vlan_id: Some(vlan),
            ..Default::default()
        },
        conditions: PolicyConditions {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        },
        active: true,
    }
}

fn binding(method_id: &str, kind: MethodKind, success: Option<i64>) -> MethodBinding {
    MethodBinding {
        method_id: method_id.to_string(),
        method_kind: kind,
        success_policy_id: success,
        failure_policy_id: None,
        registered_policy_id: None,
        unregistered_policy_id: None,
        conditional_policy_ids: Vec::new(),
        updated_utc: Utc::now(),
    }
}

#[tokio::test]
async fn bound_success_policy_supplies_attributes_and_failure_rejects() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let (status, policy) = app
        .send(
            "POST",
            "/policies",
            Some(json!({
                "name": "P1",
                "policy_type": "user",
                "priority": 10,
                "attributes": {
                    "vlan_id": 100,
                    "bandwidth_up_kbps": 10000,
                    "bandwidth_down_kbps": 50000
                }
            })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let policy_id = policy["policy_id"].as_i64().expect("policy id");

    let (status, _) = app
        .send(
            "PUT",
            "/method-bindings/tls",
            Some(json!({ "method_kind": "eap", "success_policy_id": policy_id })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Act
    let (status, accepted) = app
        .send(
            "POST",
            "/authorize",
            Some(json!({
                "method_id": "tls",
                "outcome": "success",
                "subject": { "username": "ada" }
            })),
            true,
        )
        .await;
    let (_, rejected) = app
        .send(
            "POST",
            "/authorize",
            Some(json!({
                "method_id": "tls",
                "outcome": "failure",
                "subject": { "username": "ada" }
            })),
            true,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["decision"], "accept");
    assert_eq!(accepted["policy_name"], "P1");
    assert_eq!(accepted["attributes"]["vlan_id"], 100);
    assert_eq!(accepted["attributes"]["bandwidth_up_kbps"], 10000);
    assert_eq!(accepted["attributes"]["bandwidth_down_kbps"], 50000);
    let pairs = accepted["radius_attributes"].as_array().expect("pairs");
    assert!(pairs
        .iter()
        .any(|p| p["name"] == "Tunnel-Private-Group-Id" && p["value"] == "100"));

    assert_eq!(rejected["decision"], "reject");
    assert!(rejected["policy_id"].is_null());
    assert!(rejected["radius_attributes"]
        .as_array()
        .is_some_and(Vec::is_empty));
}

#[tokio::test]
async fn lowest_priority_matching_policy_wins() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let resolver = &app.state.resolver;
    let fallback = resolver
        .create_policy(
            PolicyDraft {
                conditions: PolicyConditions::default(),
                ..draft("default", 50, 999, &[])
            },
            "test",
        )
        .await
        .expect("fallback");
    let staff_20 = resolver
        .create_policy(draft("staff-20", 20, 20, &["staff"]), "test")
        .await
        .expect("staff-20");
    let staff_10 = resolver
        .create_policy(draft("staff-10", 10, 10, &["staff"]), "test")
        .await
        .expect("staff-10");
    let mut peap = binding("peap", MethodKind::Eap, Some(fallback.policy_id));
    peap.conditional_policy_ids = vec![staff_20.policy_id, staff_10.policy_id];
    resolver.save_binding(peap, "test").await.expect("binding");

    let staff = AuthSubject {
        groups: vec!["Staff".to_string()],
        ..Default::default()
    };
    let resolution = resolver
        .resolve("peap", AuthOutcome::Success, &staff)
        .await
        .expect("resolved");
    assert_eq!(resolution.decision, Decision::Accept);
    assert_eq!(resolution.policy_id, Some(staff_10.policy_id));
    assert_eq!(resolution.attributes.vlan_id, Some(10));

    // Equal priorities go to the older policy.
    let mut tied = draft("staff-10", 10, 10, &["staff"]);
    tied.priority = 20;
    resolver
        .update_policy(staff_10.policy_id, tied, "test")
        .await
        .expect("update");
    let resolution = resolver
        .resolve("peap", AuthOutcome::Success, &staff)
        .await
        .expect("resolved");
    assert_eq!(
        resolution.policy_id,
        Some(staff_20.policy_id.min(staff_10.policy_id))
    );

    let guest = AuthSubject {
        groups: vec!["guests".to_string()],
        ..Default::default()
    };
    let resolution = resolver
        .resolve("peap", AuthOutcome::Success, &guest)
        .await
        .expect("resolved");
    assert_eq!(resolution.policy_id, Some(fallback.policy_id));
}

#[tokio::test]
async fn unbound_method_accepts_success_and_rejects_failure() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let subject = AuthSubject::default();

    let success = app
        .state
        .resolver
        .resolve("unknown", AuthOutcome::Success, &subject)
        .await
        .expect("resolved");
    let failure = app
        .state
        .resolver
        .resolve("unknown", AuthOutcome::Failure, &subject)
        .await
        .expect("resolved");

    assert_eq!(success.decision, Decision::Accept);
    assert!(success.attributes.is_empty());
    assert_eq!(failure.decision, Decision::Reject);
}

#[tokio::test]
async fn inactive_bound_policy_is_ignored() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let resolver = &app.state.resolver;
    let mut inactive = draft("dormant", 5, 300, &[]);
    inactive.active = false;
    let dormant = resolver.create_policy(inactive, "test").await.expect("policy");
    resolver
        .save_binding(binding("psk", MethodKind::Psk, Some(dormant.policy_id)), "test")
        .await
        .expect("binding");

    let resolution = resolver
        .resolve("psk", AuthOutcome::Success, &AuthSubject::default())
        .await
        .expect("resolved");

    assert_eq!(resolution.decision, Decision::Accept);
    assert_eq!(resolution.policy_id, None);
}

#[tokio::test]
async fn mac_bypass_uses_registration_slots() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let resolver = &app.state.resolver;
    let known = resolver
        .create_policy(draft("known", 10, 10, &[]), "test")
        .await
        .expect("known");
    let quarantine = resolver
        .create_policy(draft("quarantine", 10, 666, &[]), "test")
        .await
        .expect("quarantine");
    let mut mab = binding("mab", MethodKind::MacBypass, None);
    mab.registered_policy_id = Some(known.policy_id);
    mab.unregistered_policy_id = Some(quarantine.policy_id);
    resolver.save_binding(mab, "test").await.expect("binding");

    let device = |registered| AuthSubject {
        mac: Some("00:1a:2b:3c:4d:5e".parse().expect("mac")),
        registered: Some(registered),
        ..Default::default()
    };

    let registered = resolver
        .resolve("mab", AuthOutcome::Success, &device(true))
        .await
        .expect("resolved");
    let unregistered = resolver
        .resolve("mab", AuthOutcome::Failure, &device(false))
        .await
        .expect("resolved");

    assert_eq!(registered.policy_id, Some(known.policy_id));
    assert_eq!(unregistered.decision, Decision::Accept);
    assert_eq!(unregistered.attributes.vlan_id, Some(666));
}

#[tokio::test]
async fn inactive_registration_slot_falls_back_to_outcome() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let resolver = &app.state.resolver;
    let mut dormant = draft("dormant-known", 10, 10, &[]);
    dormant.active = false;
    let dormant = resolver.create_policy(dormant, "test").await.expect("policy");
    let mut mab = binding("mab", MethodKind::MacBypass, None);
    mab.registered_policy_id = Some(dormant.policy_id);
    mab.unregistered_policy_id = Some(dormant.policy_id);
    resolver.save_binding(mab, "test").await.expect("binding");

    let device = |registered| AuthSubject {
        mac: Some("00:1a:2b:3c:4d:5e".parse().expect("mac")),
        registered: Some(registered),
        ..Default::default()
    };

    // Act
    let registered_failure = resolver
        .resolve("mab", AuthOutcome::Failure, &device(true))
        .await
        .expect("resolved");
    let unregistered_failure = resolver
        .resolve("mab", AuthOutcome::Failure, &device(false))
        .await
        .expect("resolved");

    // Assert
    assert_eq!(registered_failure.decision, Decision::Reject);
    assert_eq!(registered_failure.policy_id, None);
    assert_eq!(unregistered_failure.decision, Decision::Reject);
}

#[tokio::test]
async fn conditional_policies_apply_only_where_listed() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let resolver = &app.state.resolver;
    let base = resolver
        .create_policy(draft("base", 50, 50, &[]), "test")
        .await
        .expect("base");
    let quarantine = resolver
        .create_policy(draft("quarantine", 50, 666, &[]), "test")
        .await
        .expect("quarantine");
    let staff = resolver
        .create_policy(draft("staff", 1, 10, &["staff"]), "test")
        .await
        .expect("staff");

    resolver
        .save_binding(binding("psk", MethodKind::Psk, Some(base.policy_id)), "test")
        .await
        .expect("unlisted binding");
    let mut mab = binding("mab", MethodKind::MacBypass, Some(base.policy_id));
    mab.unregistered_policy_id = Some(quarantine.policy_id);
    mab.conditional_policy_ids = vec![staff.policy_id];
    resolver.save_binding(mab, "test").await.expect("mab binding");

    let staff_subject = |registered| AuthSubject {
        groups: vec!["staff".to_string()],
        registered,
        ..Default::default()
    };

    let unlisted = resolver
        .resolve("psk", AuthOutcome::Success, &staff_subject(None))
        .await
        .expect("resolved");
    assert_eq!(unlisted.policy_id, Some(base.policy_id));

    let listed = resolver
        .resolve("mab", AuthOutcome::Success, &staff_subject(None))
        .await
        .expect("resolved");
    assert_eq!(listed.policy_id, Some(staff.policy_id));

    let unregistered = resolver
        .resolve("mab", AuthOutcome::Success, &staff_subject(Some(false)))
        .await
        .expect("resolved");
    assert_eq!(unregistered.policy_id, Some(quarantine.policy_id));
    assert_eq!(unregistered.attributes.vlan_id, Some(666));

    let unbound = resolver
        .resolve("unbound", AuthOutcome::Success, &staff_subject(None))
        .await
        .expect("resolved");
    assert_eq!(unbound.policy_id, None);
}

#[tokio::test]
async fn listing_a_policy_without_conditions_is_refused() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let plain = app
        .state
        .resolver
        .create_policy(draft("plain", 10, 10, &[]), "test")
        .await
        .expect("policy");
    let mut eap = binding("eap", MethodKind::Eap, None);
    eap.conditional_policy_ids = vec![plain.policy_id];

    let err = app
        .state
        .resolver
        .save_binding(eap, "test")
        .await
        .expect_err("refused");

    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn repeated_resolution_is_identical() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let resolver = &app.state.resolver;
    let base = resolver
        .create_policy(draft("base", 20, 20, &[]), "test")
        .await
        .expect("base");
    let staff = resolver
        .create_policy(draft("staff", 10, 10, &["staff"]), "test")
        .await
        .expect("staff");
    let mut tls = binding("tls", MethodKind::Eap, Some(base.policy_id));
    tls.conditional_policy_ids = vec![staff.policy_id];
    resolver.save_binding(tls, "test").await.expect("binding");
    let subject = AuthSubject {
        username: Some("ada".to_string()),
        groups: vec!["staff".to_string()],
        ..Default::default()
    };

    let first = resolver
        .resolve("tls", AuthOutcome::Success, &subject)
        .await
        .expect("resolved");
    for _ in 0..5 {
        let again = resolver
            .resolve("tls", AuthOutcome::Success, &subject)
            .await
            .expect("resolved");
        assert_eq!(again, first);
    }
    assert_eq!(first.policy_id, Some(staff.policy_id));
}

#[tokio::test]
async fn registration_slots_are_refused_outside_mac_bypass() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let policy = app
        .state
        .resolver
        .create_policy(draft("any", 10, 10, &[]), "test")
        .await
        .expect("policy");
    let mut eap = binding("eap", MethodKind::Eap, None);
    eap.registered_policy_id = Some(policy.policy_id);

    let err = app
        .state
        .resolver
        .save_binding(eap, "test")
        .await
        .expect_err("refused");

    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn policy_test_reports_match_without_side_effects() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let policy = app
        .state
        .resolver
        .create_policy(draft("staff", 10, 10, &["staff"]), "test")
        .await
        .expect("policy");
    let before = app.state.resolver.list_policies().await.expect("list");

    // Act
    let (status, hit) = app
        .send(
            "POST",
            &format!("/policies/{}/test", policy.policy_id),
            Some(json!({ "groups": ["staff"] })),
            true,
        )
        .await;
    let (_, miss) = app
        .send(
            "POST",
            &format!("/policies/{}/test", policy.policy_id),
            Some(json!({ "groups": ["guests"] })),
            true,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hit["matches"], true);
    assert_eq!(miss["matches"], false);
    let after = app.state.resolver.list_policies().await.expect("list");
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].updated_utc, after[0].updated_utc);

    let (status, _) = app
        .send("POST", "/policies/9999/test", Some(json!({})), true)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn policies_referenced_by_bindings_cannot_be_deleted() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let policy = app
        .state
        .resolver
        .create_policy(draft("bound", 10, 10, &[]), "test")
        .await
        .expect("policy");
    app.state
        .resolver
        .save_binding(binding("tls", MethodKind::Eap, Some(policy.policy_id)), "test")
        .await
        .expect("binding");

    let (status, _) = app
        .send("DELETE", &format!("/policies/{}", policy.policy_id), None, true)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.send("DELETE", "/method-bindings/tls", None, true).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let staff = app
        .state
        .resolver
        .create_policy(draft("listed", 10, 10, &["staff"]), "test")
        .await
        .expect("policy");
    let (status, _) = app
        .send(
            "PUT",
            "/method-bindings/peap",
            Some(json!({ "method_kind": "eap", "conditional_policy_ids": [staff.policy_id] })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .send("DELETE", &format!("/policies/{}", staff.policy_id), None, true)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send("DELETE", &format!("/policies/{}", policy.policy_id), None, true)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn invalid_vlan_is_refused() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, _) = app
        .send(
            "POST",
            "/policies",
            Some(json!({
                "name": "bad",
                "policy_type": "network",
                "priority": 1,
                "attributes": { "vlan_id": 5000 }
            })),
            true,
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
