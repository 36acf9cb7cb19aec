#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity
#![allow(clippy::expect_used)] // Tests can use expect for better error messages

use super::*;

#[test]
fn test_create_flag_request_deserialize_from_json() {
    let json = r#"{
        "key": "new-checkout",
        "name": "New checkout",
        "type": "percentage",
        "enabled": true,
        "rolloutPercentage": 25,
        "blockedSubjects": ["user-9"],
        "segmentRules": {
            "countries": ["FI", "SE"],
            "minRides": 10
        },
        "tags": ["payments"]
    }"#;

    let req: CreateFlagRequest = serde_json::from_str(json).expect("Failed to deserialize");

    assert_eq!(req.key, "new-checkout");
    assert_eq!(req.flag_type, FlagType::Percentage);
    assert_eq!(req.rollout_percentage, 25);
    assert!(req.blocked_subjects.contains("user-9"));
    assert!(req.allowed_subjects.is_empty());

    let rules = req.segment_rules.unwrap();
    assert_eq!(rules.countries, vec!["FI".to_string(), "SE".to_string()]);
    assert_eq!(rules.min_rides, Some(10));
    assert!(rules.roles.is_empty());
}

#[test]
fn test_flag_type_defaults_to_boolean() {
    let req: CreateFlagRequest = serde_json::from_str(r#"{"key": "plain"}"#).unwrap();
    assert_eq!(req.flag_type, FlagType::Boolean);
    assert!(!req.enabled);
}

#[test]
fn test_unknown_flag_type_is_rejected() {
    let result: Result<CreateFlagRequest, _> =
        serde_json::from_str(r#"{"key": "odd", "type": "multivariate"}"#);
    assert!(result.is_err());

    assert!("multivariate".parse::<FlagType>().is_err());
    assert_eq!("user_list".parse::<FlagType>().unwrap(), FlagType::UserList);
}

#[test]
fn test_evaluation_source_serializes_snake_case() {
    let result = EvaluationResult::new("flag", false, EvaluationSource::NotFound);
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["flagKey"], "flag");
    assert_eq!(json["source"], "not_found");
    assert_eq!(EvaluationSource::NoContext.to_string(), "no_context");
}

#[test]
fn test_segment_rules_is_empty() {
    assert!(SegmentRules::default().is_empty());

    let rules = SegmentRules {
        min_rating: Some(4.5),
        ..Default::default()
    };
    assert!(!rules.is_empty());
}

#[test]
fn test_override_expiry() {
    let now = chrono::Utc::now();
    let mut ov = FlagOverride {
        id: uuid::Uuid::new_v4(),
        flag_id: uuid::Uuid::new_v4(),
        subject_id: "user-1".to_string(),
        enabled: true,
        reason: None,
        expires_at: None,
        created_at: now,
    };

    assert!(!ov.is_expired(now));

    ov.expires_at = Some(now - chrono::Duration::seconds(1));
    assert!(ov.is_expired(now));

    ov.expires_at = Some(now + chrono::Duration::hours(1));
    assert!(!ov.is_expired(now));
}

#[test]
fn test_create_experiment_request_defaults() {
    let json = r#"{
        "key": "pricing-test",
        "primaryMetric": "booking",
        "variants": [
            {"key": "control", "isControl": true, "weight": 50},
            {"key": "discount", "weight": 50, "config": {"discount": 0.1}}
        ]
    }"#;

    let req: CreateExperimentRequest = serde_json::from_str(json).unwrap();

    assert_eq!(req.traffic_percentage, 100);
    assert!(req.min_sample_size.is_none());
    assert!(req.confidence_level.is_none());
    assert_eq!(req.variants.len(), 2);
    assert!(req.variants[0].is_control);
    assert!(!req.variants[1].is_control);
    assert_eq!(req.variants[1].config["discount"], 0.1);
}

#[test]
fn test_event_type_parsing() {
    assert_eq!("conversion".parse::<EventType>().unwrap(), EventType::Conversion);
    assert_eq!("impression".parse::<EventType>().unwrap(), EventType::Impression);
    assert_eq!(
        "ride_booked".parse::<EventType>().unwrap(),
        EventType::Custom("ride_booked".to_string())
    );
    assert!("  ".parse::<EventType>().is_err());
}

#[test]
fn test_track_event_request_deserialize() {
    let json = r#"{
        "experimentKey": "pricing-test",
        "eventType": "conversion",
        "value": 12.5,
        "metadata": {"source": "app"}
    }"#;

    let req: TrackEventRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.event_type, EventType::Conversion);
    assert_eq!(req.value, Some(12.5));
    assert_eq!(req.metadata["source"], "app");

    let back = serde_json::to_value(&req).unwrap();
    assert_eq!(back["eventType"], "conversion");
}

#[test]
fn test_recommended_action_serializes_snake_case() {
    let json = serde_json::to_value(RecommendedAction::ConcludeNoImprovement).unwrap();
    assert_eq!(json, "conclude_no_improvement");
    assert_eq!(
        RecommendedAction::InsufficientVariants.to_string(),
        "insufficient_variants"
    );
}

#[test]
fn test_user_context_builder() {
    let ctx = UserContext::new("user-7")
        .with_role("driver")
        .with_country("FI")
        .with_total_rides(42)
        .with_rating(4.8);

    assert_eq!(ctx.subject_id, "user-7");
    assert_eq!(ctx.role.as_deref(), Some("driver"));
    assert_eq!(ctx.country.as_deref(), Some("FI"));
    assert_eq!(ctx.total_rides, 42);
    assert!(ctx.city.is_none());
}

/// Absent, `null` and a value are three different updates for segment rules
#[test]
fn test_update_flag_request_segment_rules_null_clears() {
    let absent: UpdateFlagRequest = serde_json::from_str(r#"{ "enabled": false }"#).unwrap();
    assert!(absent.segment_rules.is_none());

    let cleared: UpdateFlagRequest =
        serde_json::from_str(r#"{ "segmentRules": null }"#).unwrap();
    assert!(matches!(cleared.segment_rules, Some(None)));

    let set: UpdateFlagRequest =
        serde_json::from_str(r#"{ "segmentRules": { "countries": ["FI"] } }"#).unwrap();
    let rules = set.segment_rules.unwrap().unwrap();
    assert_eq!(rules.countries, vec!["FI".to_string()]);

    // Clearing survives a round trip
    let json = serde_json::to_string(&cleared).unwrap();
    assert_eq!(json, r#"{"segmentRules":null}"#);
}
