use chrono::{NaiveDate, NaiveTime};
use risk_forecast::{
    feedback::FeedbackService,
    ml::{FrequencyKind, ModelRegistry, PredictionConfig, Trainer},
    models::{ConfirmedPrediction, Delegation, IncidentOrigin},
    state::{IncidentRepository, InMemoryModelStore, InMemoryRepository, ModelStore},
    AppError,
};
use std::sync::Arc;

struct Harness {
    repo: InMemoryRepository,
    store: Arc<InMemoryModelStore>,
    feedback: FeedbackService,
}

fn harness() -> Harness {
    let repo = InMemoryRepository::with_default_risk_levels();
    repo.add_delegation(Delegation::new(1, "Centro"));
    repo.add_delegation(Delegation::new(2, "Norte"));

    let store = Arc::new(InMemoryModelStore::new());
    let repository: Arc<dyn IncidentRepository> = Arc::new(repo.clone());
    let config = Arc::new(PredictionConfig {
        n_trees: 8,
        ..Default::default()
    });
    let trainer = Trainer::new(
        repository.clone(),
        ModelRegistry::new(store.clone()),
        config.clone(),
    );
    let feedback = FeedbackService::new(repository, trainer, config);

    Harness {
        repo,
        store,
        feedback,
    }
}

fn seed_history(repo: &InMemoryRepository, delegation_id: i64, rows: u32) {
    for i in 0..rows {
        repo.add_incident(
            delegation_id,
            if i % 2 == 0 { "Robo" } else { "Asalto" },
            if i % 3 == 0 { "Mercado" } else { "Zocalo" },
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Duration::days(i64::from(i)),
            NaiveTime::from_hms_opt((i * 7) % 24, 0, 0).unwrap(),
            i64::from(i % 3) + 1,
        );
    }
}

fn confirmed(id: &str, delegation_id: i64, risk_level_id: i64) -> ConfirmedPrediction {
    ConfirmedPrediction {
        prediction_id: id.to_string(),
        delegation_id,
        incident_type: "Robo".to_string(),
        location: "Zocalo".to_string(),
        date: NaiveDate::from_ymd_opt(2099, 6, 1).unwrap(),
        time: NaiveTime::from_hms_opt(22, 10, 0).unwrap(),
        risk_level_id,
        confirmed: true,
        migrated: false,
    }
}

#[tokio::test]
async fn test_feedback_retrains_delegation_model() {
    let h = harness();
    seed_history(&h.repo, 1, 20);

    let receipt = h
        .feedback
        .record_feedback(confirmed("pred-55555", 1, 3))
        .await
        .unwrap();
    assert!(receipt.retrained);

    assert!(h.store.exists(&ModelRegistry::model_key(1)).await.unwrap());
    assert!(h
        .store
        .exists(&ModelRegistry::frequency_key(FrequencyKind::Types, 1))
        .await
        .unwrap());
    assert!(!h.store.exists(&ModelRegistry::model_key(2)).await.unwrap());
}

#[tokio::test]
async fn test_non_prediction_id_is_rejected() {
    let h = harness();
    let err = h
        .feedback
        .record_feedback(confirmed("inc-1", 1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(h.repo.staged_predictions().is_empty());
}

#[tokio::test]
async fn test_migration_moves_only_confirmed_rows() {
    let h = harness();
    seed_history(&h.repo, 2, 15);

    h.feedback
        .record_feedback(confirmed("pred-10001", 1, 2))
        .await
        .unwrap();
    h.feedback
        .record_feedback(confirmed("pred-10002", 2, 3))
        .await
        .unwrap();
    let mut rejected = confirmed("pred-10003", 2, 1);
    rejected.confirmed = false;
    h.feedback.record_feedback(rejected).await.unwrap();

    let report = h.feedback.migrate_confirmed().await.unwrap();
    assert_eq!(report.migrated, 2);
    assert_eq!(report.delegation_ids, vec![1, 2]);
    // Delegation 1 has a single incident, too few to train on
    assert_eq!(report.retrained, vec![2]);

    let migrated: Vec<_> = h
        .repo
        .incidents_for(2)
        .into_iter()
        .filter(|i| i.origin == IncidentOrigin::Prediccion)
        .collect();
    assert_eq!(migrated.len(), 1);
    assert_eq!(migrated[0].risk_level_id, 3);

    let staged = h.repo.staged_predictions();
    assert_eq!(staged.iter().filter(|p| p.migrated).count(), 2);
    assert!(staged.iter().any(|p| !p.confirmed && !p.migrated));

    let again = h.feedback.migrate_confirmed().await.unwrap();
    assert_eq!(again.migrated, 0);
    assert!(again.delegation_ids.is_empty());
}
