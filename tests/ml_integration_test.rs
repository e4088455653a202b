/// Integration tests for the risk model pipeline
///
/// These tests verify the complete flow:
/// - Feature extraction from the asset store
/// - Training, evaluation and publication
/// - Batch prediction over active lines
/// - Persistence and reload of the trained artifact
/// - Registry behaviour under concurrent readers
mod common;

use common::*;
use std::sync::Arc;
use tempfile::TempDir;
use tlamp_risk::{
    error::AppError,
    ml::{
        trainer::fit_and_evaluate, Classifier, FeatureExtractor, LabelRule, MetricsReporter,
        ModelRegistry, ModelTrainer, PredictionService, RiskClass, TrainedModel,
    },
    models::LineStatus,
    state::{AssetStore, IncidentFilter, LineFilter, TowerFilter},
};

async fn setup(per_group: usize) -> (Arc<dyn AssetStore>, Arc<ModelRegistry>, ModelTrainer) {
    let store = memory_store();
    seed_scenario(&store, per_group).await;
    let registry = Arc::new(ModelRegistry::new());
    let trainer = ModelTrainer::new(test_ml_config(), store.clone(), registry.clone());
    (store, registry, trainer)
}

#[tokio::test]
async fn test_incident_history_drives_risk_class() {
    let store = memory_store();
    let trips_by_line = seed_scenario(&store, 10).await;
    let registry = Arc::new(ModelRegistry::new());
    let trainer = ModelTrainer::new(test_ml_config(), store.clone(), registry.clone());

    let metrics = trainer.train_all_as_of(today()).await.unwrap();
    assert_eq!(metrics.total_samples, 30);
    assert_eq!(metrics.risk_distribution.low, 10);
    assert_eq!(metrics.risk_distribution.medium, 10);
    assert_eq!(metrics.risk_distribution.high, 10);

    let predictions = PredictionService::new(store, registry)
        .predict_all_as_of(today())
        .await
        .unwrap();
    assert_eq!(predictions.len(), 30);

    for p in &predictions {
        match trips_by_line[&p.line_id] {
            12 => {
                assert_eq!(p.predicted_risk, RiskClass::High);
                assert!(p.risk_probability >= 0.5);
                assert_eq!(p.recent_incidents, 12);
            }
            5 => assert_eq!(p.predicted_risk, RiskClass::Medium),
            _ => assert_eq!(p.predicted_risk, RiskClass::Low),
        }
    }
}

#[tokio::test]
async fn test_line_age_drives_labels_and_predictions() {
    // (incidents, age in years, expected class)
    let groups = [
        (0u32, 10u32, RiskClass::Low),
        (5, 25, RiskClass::Medium),
        (12, 40, RiskClass::High),
        (0, 40, RiskClass::Medium),
        (1, 25, RiskClass::Low),
    ];

    let store = memory_store();
    let mut expected = std::collections::HashMap::new();
    for i in 0..6 {
        for (trips, age, class) in groups {
            let line = add_line_commissioned(
                &store,
                &format!("LINE-{}-{}-{}", trips, age, i),
                trips,
                commissioned_years_ago(age, today()),
                today(),
            )
            .await;
            expected.insert(line.id, (trips, age, class));
        }
    }

    // Labels follow the threshold rule, age included
    let lines = store.list_lines(&LineFilter::default()).await.unwrap();
    let incidents = store.list_incidents(&IncidentFilter::default()).await.unwrap();
    let batch = FeatureExtractor::default().extract_all(&lines, &incidents, &[], today());
    let rule = LabelRule::default();
    for (line, features) in &batch.rows {
        let (_, age, class) = expected[&line.id];
        assert!(features.line_age > age as f64 && features.line_age < age as f64 + 1.0);
        assert_eq!(rule.label(features), class);
    }

    let registry = Arc::new(ModelRegistry::new());
    let trainer = ModelTrainer::new(test_ml_config(), store.clone(), registry.clone());
    let metrics = trainer.train_all_as_of(today()).await.unwrap();
    assert_eq!(metrics.total_samples, 30);
    assert_eq!(metrics.risk_distribution.low, 12);
    assert_eq!(metrics.risk_distribution.medium, 12);
    assert_eq!(metrics.risk_distribution.high, 6);

    let predictions = PredictionService::new(store, registry)
        .predict_all_as_of(today())
        .await
        .unwrap();
    assert_eq!(predictions.len(), 30);

    for p in &predictions {
        let (trips, age, class) = expected[&p.line_id];
        assert_eq!(p.predicted_risk, class, "{} incidents, {} years", trips, age);
        if class == RiskClass::High {
            assert!(p.risk_probability >= 0.5);
        }
    }
}

#[tokio::test]
async fn test_probabilities_in_range_and_predictions_idempotent() {
    let (store, registry, trainer) = setup(6).await;
    trainer.train_all_as_of(today()).await.unwrap();

    let service = PredictionService::new(store, registry);
    let mut first = service.predict_all_as_of(today()).await.unwrap();
    let mut second = service.predict_all_as_of(today()).await.unwrap();
    first.sort_by_key(|p| p.line_id);
    second.sort_by_key(|p| p.line_id);

    assert_eq!(first, second);
    for p in &first {
        assert!((0.0..=1.0).contains(&p.risk_probability));
        assert!(p.risk_probability >= 1.0 / 3.0);
    }
}

#[tokio::test]
async fn test_feature_extraction_is_deterministic() {
    let (store, _, _) = setup(4).await;
    let lines = store.list_lines(&LineFilter::default()).await.unwrap();
    let incidents = store.list_incidents(&IncidentFilter::default()).await.unwrap();
    let towers = store.list_towers(&TowerFilter::default()).await.unwrap();

    let extractor = FeatureExtractor::default();
    let a = extractor.extract_all(&lines, &incidents, &towers, today());
    let b = extractor.extract_all(&lines, &incidents, &towers, today());

    assert_eq!(a.rows.len(), 12);
    for ((la, fa), (lb, fb)) in a.rows.iter().zip(b.rows.iter()) {
        assert_eq!(la.id, lb.id);
        assert_eq!(fa, fb);
    }
}

#[tokio::test]
async fn test_fixed_seed_gives_identical_runs() {
    let (store, _, _) = setup(8).await;
    let lines = store.list_lines(&LineFilter::default()).await.unwrap();
    let incidents = store.list_incidents(&IncidentFilter::default()).await.unwrap();
    let config = test_ml_config();

    let a = fit_and_evaluate(&config, &lines, &incidents, &[], today()).unwrap();
    let b = fit_and_evaluate(&config, &lines, &incidents, &[], today()).unwrap();

    assert_eq!(a.metrics.training_samples, b.metrics.training_samples);
    assert_eq!(a.metrics.test_samples, b.metrics.test_samples);
    assert_eq!(a.metrics.accuracy, b.metrics.accuracy);
    assert_eq!(a.metrics.confusion_matrix, b.metrics.confusion_matrix);
    assert_eq!(a.metrics.feature_importance, b.metrics.feature_importance);
    assert_eq!(a.model.forest(), b.model.forest());
}

#[tokio::test]
async fn test_split_sizes_stable_across_retrains() {
    let (_, _, trainer) = setup(5).await;

    let first = trainer.train_all_as_of(today()).await.unwrap();
    let second = trainer.train_all_as_of(today()).await.unwrap();

    assert_eq!(first.total_samples, 15);
    assert_eq!(first.test_samples, 3);
    assert_eq!(first.training_samples, 12);
    assert_eq!(first.test_samples, second.test_samples);
    assert_eq!(first.training_samples, second.training_samples);
    assert_eq!(first.accuracy, second.accuracy);
}

#[tokio::test]
async fn test_metrics_before_training() {
    let registry = Arc::new(ModelRegistry::new());
    let reporter = MetricsReporter::new(registry);

    let untrained = reporter.get_metrics().unwrap_err();
    assert_eq!(untrained.error, "Model not trained");
    assert_eq!(untrained.current_samples, 0);
    assert!(!untrained.message.is_empty());
}

#[tokio::test]
async fn test_predict_before_training_fails() {
    let (store, registry, _) = setup(2).await;
    let result = PredictionService::new(store, registry).predict_all_as_of(today()).await;
    assert!(matches!(result, Err(AppError::ModelNotTrained)));
}

#[tokio::test]
async fn test_insufficient_samples_keeps_previous_model() {
    let (store, registry, trainer) = setup(4).await;
    trainer.train_all_as_of(today()).await.unwrap();
    let published = registry.current().unwrap();

    // Drop to 9 usable lines
    let lines = store.list_lines(&LineFilter::default()).await.unwrap();
    for line in lines.iter().take(3) {
        store.delete_line(line.id).await.unwrap();
    }

    let err = trainer.train_all_as_of(today()).await.unwrap_err();
    match err {
        AppError::InsufficientSamples(details) => {
            assert_eq!(details.current_samples, 9);
            assert_eq!(details.error, "Not enough data for training");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let still_published = registry.current().unwrap();
    assert!(Arc::ptr_eq(&published, &still_published));

    // The previous model's metrics are still reported
    let metrics = MetricsReporter::new(registry).get_metrics().unwrap();
    assert_eq!(metrics.total_samples, 12);
}

#[tokio::test]
async fn test_exactly_minimum_samples_trains() {
    let store = memory_store();
    for i in 0..10u32 {
        add_line(&store, &format!("LINE-{}", i), (i % 3) * 6).await;
    }
    let trainer = ModelTrainer::new(test_ml_config(), store, Arc::new(ModelRegistry::new()));

    let metrics = trainer.train_all_as_of(today()).await.unwrap();
    assert_eq!(metrics.total_samples, 10);
    assert_eq!(metrics.test_samples, 2);
}

#[tokio::test]
async fn test_rejection_reported_before_first_model() {
    let store = memory_store();
    for i in 0..4 {
        add_line(&store, &format!("LINE-{}", i), 1).await;
    }
    let registry = Arc::new(ModelRegistry::new());
    let trainer = ModelTrainer::new(test_ml_config(), store, registry.clone());

    assert!(trainer.train_all_as_of(today()).await.is_err());
    let untrained = MetricsReporter::new(registry).get_metrics().unwrap_err();
    assert_eq!(untrained.current_samples, 4);
}

#[tokio::test]
async fn test_inactive_lines_are_not_scored() {
    let (store, registry, trainer) = setup(4).await;
    trainer.train_all_as_of(today()).await.unwrap();

    let mut line = store.list_lines(&LineFilter::default()).await.unwrap().remove(0);
    line.status = LineStatus::Inactive;
    store.update_line(&line).await.unwrap();

    let predictions = PredictionService::new(store, registry)
        .predict_all_as_of(today())
        .await
        .unwrap();
    assert_eq!(predictions.len(), 11);
    assert!(predictions.iter().all(|p| p.line_id != line.id));
}

#[tokio::test]
async fn test_save_load_gives_identical_predictions() {
    let (_, registry, trainer) = setup(5).await;
    trainer.train_all_as_of(today()).await.unwrap();
    let trained = registry.current().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("risk_model.bin");
    trained.save(&path).unwrap();
    let loaded = TrainedModel::load(&path).unwrap();

    assert_eq!(loaded.metrics, trained.metrics);
    let (store, _, _) = setup(5).await;
    let lines = store.list_lines(&LineFilter::default()).await.unwrap();
    let incidents = store.list_incidents(&IncidentFilter::default()).await.unwrap();
    let batch = trained.model.extractor().extract_all(&lines, &incidents, &[], today());

    for (_, features) in &batch.rows {
        let before = trained.model.predict(features).unwrap();
        let after = loaded.model.predict(features).unwrap();
        assert_eq!(before.probabilities, after.probabilities);
        assert_eq!(before.class, after.class);
    }
}

#[tokio::test]
async fn test_persisted_model_is_loaded_on_startup() {
    let dir = TempDir::new().unwrap();
    let mut config = test_ml_config();
    config.model_path = Some(dir.path().join("model.bin").to_string_lossy().into_owned());

    let (store, _, _) = setup(4).await;
    let first = ModelTrainer::new(config.clone(), store.clone(), Arc::new(ModelRegistry::new()));
    let trained = first.train_all_as_of(today()).await.unwrap();

    let registry = Arc::new(ModelRegistry::new());
    let restarted = ModelTrainer::new(config, store, registry.clone());
    restarted.initialize().await.unwrap();

    let reloaded = registry.current().unwrap();
    assert_eq!(reloaded.metrics, trained);
}

#[tokio::test]
async fn test_startup_without_artifact_stays_untrained() {
    let (store, registry, _) = setup(4).await;
    let dir = TempDir::new().unwrap();
    let mut config = test_ml_config();
    config.model_path = Some(dir.path().join("missing.bin").to_string_lossy().into_owned());

    ModelTrainer::new(config, store, registry.clone())
        .initialize()
        .await
        .unwrap();
    assert!(!registry.is_trained());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retrain_is_atomic_for_concurrent_readers() {
    let (store, registry, trainer) = setup(6).await;
    trainer.train_all_as_of(today()).await.unwrap();
    let trainer = Arc::new(trainer);
    let service = PredictionService::new(store, registry.clone());

    let mut readers = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                let batch = service.predict_batch(today()).await.unwrap();
                assert_eq!(batch.predictions.len(), 18);
                assert_eq!(batch.model.metrics.total_samples, 18);
                tokio::task::yield_now().await;
            }
        }));
    }

    let writer = {
        let trainer = trainer.clone();
        tokio::spawn(async move {
            for _ in 0..3 {
                trainer.train_all_as_of(today()).await.unwrap();
            }
        })
    };

    for reader in readers {
        reader.await.unwrap();
    }
    writer.await.unwrap();
    assert!(registry.is_trained());
}
