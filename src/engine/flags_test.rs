#![allow(clippy::unwrap_used)]

use super::*;
use crate::engine::cache::DEFAULT_CACHE_TTL;
use crate::engine::clock::MockClock;
use crate::engine::fixtures::epoch;
use crate::engine::store::{MockStore, StoreError};
use crate::model::{EvaluationSource, FlagType, SegmentRules};
use std::collections::BTreeSet;

struct Harness {
    clock: Arc<MockClock>,
    store: Arc<MockStore>,
    service: FlagService,
}

fn harness() -> Harness {
    let clock = Arc::new(MockClock::new(epoch()));
    let store = Arc::new(MockStore::new(clock.clone()));
    let service = FlagService::new(store.clone(), clock.clone(), DEFAULT_CACHE_TTL, None);
    Harness {
        clock,
        store,
        service,
    }
}

fn boolean(key: &str) -> CreateFlagRequest {
    CreateFlagRequest {
        key: key.to_string(),
        enabled: true,
        ..Default::default()
    }
}

fn override_req(subject: &str, enabled: bool) -> CreateOverrideRequest {
    CreateOverrideRequest {
        subject_id: subject.to_string(),
        enabled,
        reason: Some("QA".to_string()),
        expires_at: None,
    }
}

#[tokio::test]
async fn test_create_flag() {
    let h = harness();
    let flag = h
        .service
        .create_flag(CreateFlagRequest {
            key: "new-checkout".to_string(),
            flag_type: FlagType::Percentage,
            rollout_percentage: 25,
            tags: vec!["payments".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(flag.name, "new-checkout");
    assert_eq!(flag.status, FlagStatus::Active);
    assert_eq!(flag.created_at, epoch());

    let stored = h.service.get_flag("new-checkout").await.unwrap();
    assert_eq!(stored, flag);
}

#[tokio::test]
async fn test_create_flag_rejects_duplicate_key() {
    let h = harness();
    h.service.create_flag(boolean("dup")).await.unwrap();

    let err = h.service.create_flag(boolean("dup")).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::DuplicateKey { kind: "flag", .. })
    ));
}

#[tokio::test]
async fn test_create_flag_validates() {
    let h = harness();
    let mut req = boolean("bad");
    req.rollout_percentage = 150;
    assert!(matches!(
        h.service.create_flag(req).await,
        Err(ServiceError::Validation(_))
    ));
}

/// Admin write then read: exactly one reload, and the read sees the write
#[tokio::test]
async fn test_update_invalidates_cache() {
    let h = harness();
    h.service.create_flag(boolean("dark-mode")).await.unwrap();
    assert!(h.service.evaluate_flag("dark-mode", None).await.enabled);
    assert_eq!(h.store.reloads(), 1);

    h.service
        .update_flag(
            "dark-mode",
            UpdateFlagRequest {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!h.service.evaluate_flag("dark-mode", None).await.enabled);
    assert!(!h.service.evaluate_flag("dark-mode", None).await.enabled);
    assert_eq!(h.store.reloads(), 2);
}

#[tokio::test]
async fn test_partial_update_keeps_unset_fields() {
    let h = harness();
    let mut req = boolean("beta");
    req.description = Some("Beta programme".to_string());
    req.allowed_subjects = BTreeSet::from(["a".to_string()]);
    req.segment_rules = Some(SegmentRules {
        countries: vec!["FI".to_string()],
        ..Default::default()
    });
    h.service.create_flag(req).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(5));

    let updated = h
        .service
        .update_flag(
            "beta",
            UpdateFlagRequest {
                flag_type: Some(FlagType::Segment),
                rollout_percentage: Some(40),
                segment_rules: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.flag_type, FlagType::Segment);
    assert_eq!(updated.rollout_percentage, 40);
    assert!(updated.segment_rules.is_none());
    assert_eq!(updated.description.as_deref(), Some("Beta programme"));
    assert!(updated.allowed_subjects.contains("a"));
    assert_eq!(updated.updated_at, epoch() + chrono::Duration::minutes(5));
    assert_eq!(updated.created_at, epoch());
}

#[tokio::test]
async fn test_deactivate_via_update() {
    let h = harness();
    h.service.create_flag(boolean("promo")).await.unwrap();
    h.service
        .update_flag(
            "promo",
            UpdateFlagRequest {
                status: Some(FlagStatus::Inactive),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = h.service.evaluate_flag("promo", None).await;
    assert_eq!(result.source, EvaluationSource::NotFound);

    // Still visible to admin lookups
    assert_eq!(
        h.service.get_flag("promo").await.unwrap().status,
        FlagStatus::Inactive
    );
}

#[tokio::test]
async fn test_toggle_flips_enabled() {
    let h = harness();
    h.service.create_flag(boolean("toggle-me")).await.unwrap();

    let flag = h.service.toggle_flag("toggle-me").await.unwrap();
    assert!(!flag.enabled);
    assert!(!h.service.evaluate_flag("toggle-me", None).await.enabled);

    let flag = h.service.toggle_flag("toggle-me").await.unwrap();
    assert!(flag.enabled);
    assert!(h.service.evaluate_flag("toggle-me", None).await.enabled);
}

#[tokio::test]
async fn test_archived_flag_is_terminal() {
    let h = harness();
    h.service.create_flag(boolean("old")).await.unwrap();
    let archived = h.service.archive_flag("old").await.unwrap();
    assert_eq!(archived.status, FlagStatus::Archived);

    assert!(matches!(
        h.service.toggle_flag("old").await,
        Err(ServiceError::Validation(ValidationError::FlagArchived(_)))
    ));
    assert!(matches!(
        h.service
            .update_flag(
                "old",
                UpdateFlagRequest {
                    status: Some(FlagStatus::Active),
                    ..Default::default()
                }
            )
            .await,
        Err(ServiceError::Validation(ValidationError::FlagArchived(_)))
    ));
    assert!(h.service.archive_flag("old").await.is_err());

    let result = h.service.evaluate_flag("old", None).await;
    assert_eq!(result.source, EvaluationSource::NotFound);
}

#[tokio::test]
async fn test_unknown_flag_admin_ops_are_not_found() {
    let h = harness();
    assert!(matches!(
        h.service.get_flag("ghost").await,
        Err(ServiceError::NotFound { kind: "flag", .. })
    ));
    assert!(matches!(
        h.service.toggle_flag("ghost").await,
        Err(ServiceError::NotFound { .. })
    ));
    assert!(matches!(
        h.service.create_override("ghost", override_req("u", true)).await,
        Err(ServiceError::NotFound { .. })
    ));
}

/// Store failures on admin paths surface to the caller
#[tokio::test]
async fn test_admin_store_failure_is_returned() {
    let h = harness();
    h.store.set_failing(true);

    let err = h.service.create_flag(boolean("x")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::Unavailable(_))));

    let err = h.service.list_flags().await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(_)));
}

#[tokio::test]
async fn test_list_flags_includes_every_status() {
    let h = harness();
    for key in ["c", "a", "b"] {
        h.service.create_flag(boolean(key)).await.unwrap();
    }
    h.service.archive_flag("b").await.unwrap();

    let keys: Vec<String> = h
        .service
        .list_flags()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.key)
        .collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_override_lifecycle() {
    let h = harness();
    h.service.create_flag(boolean("beta")).await.unwrap();
    let ctx = UserContext::new("user-1");

    let ov = h
        .service
        .create_override("beta", override_req("user-1", false))
        .await
        .unwrap();
    assert_eq!(ov.reason.as_deref(), Some("QA"));

    let result = h.service.evaluate_flag("beta", Some(&ctx)).await;
    assert_eq!((result.enabled, result.source), (false, EvaluationSource::Override));

    // Upsert replaces the earlier override
    h.service
        .create_override("beta", override_req("user-1", true))
        .await
        .unwrap();
    let listed = h.service.list_overrides("beta").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].enabled);

    h.service.delete_override("beta", "user-1").await.unwrap();
    let result = h.service.evaluate_flag("beta", Some(&ctx)).await;
    assert_eq!(result.source, EvaluationSource::Default);

    assert!(matches!(
        h.service.delete_override("beta", "user-1").await,
        Err(ServiceError::NotFound { kind: "override", .. })
    ));

    // Override writes never touch the cache
    assert_eq!(h.store.reloads(), 1);
}

#[tokio::test]
async fn test_override_expiry() {
    let h = harness();
    h.service.create_flag(boolean("beta")).await.unwrap();

    let mut req = override_req("user-1", false);
    req.expires_at = Some("2024-03-01T13:00:00Z".to_string());
    let ov = h.service.create_override("beta", req).await.unwrap();
    assert_eq!(ov.expires_at, Some(epoch() + chrono::Duration::hours(1)));

    let ctx = UserContext::new("user-1");
    assert!(!h.service.evaluate_flag("beta", Some(&ctx)).await.enabled);

    h.clock.advance(chrono::Duration::hours(2));
    assert!(h.service.evaluate_flag("beta", Some(&ctx)).await.enabled);

    // Expired overrides remain listed
    assert_eq!(h.service.list_overrides("beta").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_override_request_validation() {
    let h = harness();
    h.service.create_flag(boolean("beta")).await.unwrap();

    let mut req = override_req("user-1", true);
    req.expires_at = Some("tomorrow".to_string());
    assert!(matches!(
        h.service.create_override("beta", req).await,
        Err(ServiceError::Validation(ValidationError::InvalidExpiry { .. }))
    ));

    assert!(matches!(
        h.service.create_override("beta", override_req(" ", true)).await,
        Err(ServiceError::Validation(ValidationError::EmptyKey("subject")))
    ));
}

#[tokio::test]
async fn test_evaluate_flags_batch() {
    let h = harness();
    h.service.create_flag(boolean("a")).await.unwrap();
    let mut b = boolean("b");
    b.flag_type = FlagType::Percentage;
    b.rollout_percentage = 100;
    h.service.create_flag(b).await.unwrap();

    let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let results = h
        .service
        .evaluate_flags(&keys, Some(&UserContext::new("user-1")))
        .await;

    assert!(results["a"].enabled);
    assert!(results["b"].enabled);
    assert_eq!(results["c"].source, EvaluationSource::NotFound);
}
