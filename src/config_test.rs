#![allow(clippy::unwrap_used)]

use super::*;
use crate::engine::clock::MockClock;
use crate::engine::fixtures::epoch;
use crate::engine::MemoryStore;
use crate::model::{ExperimentStatus, EvaluationSource, UserContext};
use std::collections::HashMap;
use std::sync::Arc;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

fn services() -> (FlagService, ExperimentService) {
    let clock = Arc::new(MockClock::new(epoch()));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let flags = FlagService::new(store.clone(), clock.clone(), DEFAULT_CACHE_TTL, None);
    let experiments =
        ExperimentService::new(store, clock, ExperimentDefaults::default(), None);
    (flags, experiments)
}

#[test]
fn test_defaults_when_unset() {
    let config = EngineConfig::from_lookup(lookup(&[]));

    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.cache_ttl(), Duration::from_secs(30));
    assert_eq!(config.health_port, 8080);
    assert_eq!(config.experiment_defaults(), ExperimentDefaults::default());
    assert!(config.seed_file.is_none());
}

#[test]
fn test_reads_every_variable() {
    let config = EngineConfig::from_lookup(lookup(&[
        (ENV_CACHE_TTL_SECONDS, "5"),
        (ENV_HEALTH_PORT, " 9090 "),
        (ENV_MIN_SAMPLE_SIZE, "250"),
        (ENV_CONFIDENCE_LEVEL, "0.99"),
        (ENV_SEED_FILE, "/etc/kokeilu/seed.json"),
    ]));

    assert_eq!(config.cache_ttl(), Duration::from_secs(5));
    assert_eq!(config.health_port, 9090);
    assert_eq!(
        config.experiment_defaults(),
        ExperimentDefaults {
            min_sample_size: 250,
            confidence_level: 0.99,
        }
    );
    assert_eq!(
        config.seed_file.as_deref(),
        Some(Path::new("/etc/kokeilu/seed.json"))
    );
}

/// Bad values fall back individually; good ones still apply
#[test]
fn test_unparsable_values_fall_back() {
    let config = EngineConfig::from_lookup(lookup(&[
        (ENV_CACHE_TTL_SECONDS, "thirty"),
        (ENV_HEALTH_PORT, "70000"),
        (ENV_MIN_SAMPLE_SIZE, "-1"),
        (ENV_CONFIDENCE_LEVEL, "1.5"),
        (ENV_SEED_FILE, "   "),
    ]));

    assert_eq!(config, EngineConfig::default());
}

#[tokio::test]
async fn test_apply_seed_creates_and_starts() {
    let (flags, experiments) = services();
    let doc: SeedDocument = serde_json::from_str(
        r#"{
            "flags": [
                { "key": "dark-mode", "enabled": true },
                { "key": "new-checkout", "type": "percentage", "rolloutPercentage": 100 }
            ],
            "experiments": [
                {
                    "key": "checkout-copy",
                    "start": true,
                    "primaryMetric": "purchase",
                    "variants": [
                        { "key": "control", "isControl": true, "weight": 50 },
                        { "key": "urgent", "weight": 50 }
                    ]
                },
                {
                    "key": "later",
                    "variants": [{ "key": "control", "isControl": true, "weight": 100 }]
                }
            ]
        }"#,
    )
    .unwrap();

    let summary = apply_seed(doc, &flags, &experiments).await.unwrap();
    assert_eq!(
        summary,
        SeedSummary {
            flags: 2,
            experiments: 2,
            started: 1,
        }
    );

    let ctx = UserContext::new("user-1");
    let result = flags.evaluate_flag("new-checkout", Some(&ctx)).await;
    assert!(result.enabled);
    assert_eq!(result.source, EvaluationSource::Percentage);

    let running = experiments
        .list_experiments(Some(ExperimentStatus::Running))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].key, "checkout-copy");
    assert_eq!(running[0].traffic_percentage, 100);
    assert!(experiments
        .get_variant_for_user("checkout-copy", &ctx)
        .await
        .is_some());
}

/// Seeded entries go through the same validation as admin calls
#[tokio::test]
async fn test_apply_seed_rejects_invalid_entry() {
    let (flags, experiments) = services();
    let doc: SeedDocument = serde_json::from_str(
        r#"{
            "experiments": [{
                "key": "lopsided",
                "variants": [
                    { "key": "control", "isControl": true, "weight": 70 },
                    { "key": "b", "weight": 20 }
                ]
            }]
        }"#,
    )
    .unwrap();

    let err = apply_seed(doc, &flags, &experiments).await.unwrap_err();
    assert!(matches!(
        err,
        SeedError::Apply {
            ref key,
            source: ServiceError::Validation(_),
        } if key == "lopsided"
    ));
}

#[tokio::test]
async fn test_load_seed_file_errors() {
    let missing = std::env::temp_dir().join(format!("kokeilu-missing-{}.json", uuid::Uuid::new_v4()));
    assert!(matches!(
        load_seed_file(&missing).await,
        Err(SeedError::Read { .. })
    ));

    let broken = std::env::temp_dir().join(format!("kokeilu-broken-{}.json", uuid::Uuid::new_v4()));
    tokio::fs::write(&broken, "{ not json").await.unwrap();
    assert!(matches!(
        load_seed_file(&broken).await,
        Err(SeedError::Parse { .. })
    ));
    tokio::fs::remove_file(&broken).await.unwrap();
}

#[tokio::test]
async fn test_load_seed_file_reads_document() {
    let path = std::env::temp_dir().join(format!("kokeilu-seed-{}.json", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, r#"{ "flags": [{ "key": "a" }] }"#)
        .await
        .unwrap();

    let doc = load_seed_file(&path).await.unwrap();
    assert_eq!(doc.flags.len(), 1);
    assert!(doc.experiments.is_empty());

    tokio::fs::remove_file(&path).await.unwrap();
}
