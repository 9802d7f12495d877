// tests/profile_aggregation.rs
//
// Response lifecycle through the engine: coverage penalty, idempotent
// recomputation, edits and user label overrides.

mod common;

use std::sync::Arc;
use std::time::Duration;

use politiek_matcher::classify::{ClassificationSource, NO_RULE_NEUTRAL};
use politiek_matcher::engine::{ClassifyOutcome, MatchOutcome};
use politiek_matcher::models::mock::{FailingStanceModel, InMemoryModelLoader};
use politiek_matcher::store::{LabelSource, MatchStore, StatementResponse};
use politiek_matcher::{MatchEngine, Stance};

use common::*;

async fn seeded() -> (Arc<MatchEngine>, Arc<dyn MatchStore>) {
    let store: Arc<dyn MatchStore> = Arc::new(climate_store());
    let engine = engine_over(store.clone(), offline_registry());
    for r in [
        response(1, 1, 1, "Ik ben volledig voor klimaatbeleid"),
        response(2, 1, 2, "Ja, meer natuur is goed"),
        response(3, 1, 3, "Ja, subsidie is prima"),
    ] {
        engine.submit_response(r).await.unwrap();
    }
    engine.force_profile_matching(1).await.unwrap();
    (engine, store)
}

#[tokio::test]
async fn partial_coverage_is_penalised_but_agreement_is_not() {
    let (_engine, store) = seeded().await;

    let pro = store.party_match(1, PRO_PARTY).await.unwrap().unwrap();
    assert_eq!(pro.aggregate.total_statements, 3);
    assert_eq!(pro.aggregate.matching_statements, 3);
    assert_eq!(pro.aggregate.penalty_factor, 1.0);
    assert_eq!(pro.aggregate.match_percentage, pro.aggregate.agreement_score);

    let anti = store.party_match(1, ANTI_PARTY).await.unwrap().unwrap();
    let a = anti.aggregate;
    assert_eq!(a.total_statements, 1);
    assert!((a.coverage_ratio - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(a.penalty_factor, 0.5);
    assert!((a.match_percentage - a.agreement_score * 0.5).abs() < 1e-9);
    assert!(pro.aggregate.match_percentage > a.match_percentage);
}

#[tokio::test]
async fn recalculation_is_idempotent() {
    let (engine, store) = seeded().await;
    let before = store.party_matches_for_profile(1).await.unwrap();
    assert_eq!(engine.recalculate_profile_matches(1).await.unwrap(), 2);
    assert_eq!(engine.recalculate_profile_matches(1).await.unwrap(), 2);
    let after = store.party_matches_for_profile(1).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn every_score_is_within_bounds() {
    let (_engine, store) = seeded().await;
    for m in store.statement_matches_for_profile(1).await.unwrap() {
        assert!((0.0..=100.0).contains(&m.final_score));
        assert!(m.dimension_modifier.abs() <= 20.0);
    }
    for pm in store.party_matches_for_profile(1).await.unwrap() {
        assert!((0.0..=100.0).contains(&pm.aggregate.match_percentage));
    }
}

#[tokio::test]
async fn editing_drops_matches_and_stale_parties() {
    let (engine, store) = seeded().await;

    let edited = engine.edit_response(1, "Misschien", 4, 2).await.unwrap();
    assert_eq!(edited.label, None);
    assert_eq!(edited.classification, None);
    assert!(store.statement_matches_for_response(1).await.unwrap().is_empty());
    // the anti party only had statement 1
    assert!(store.party_match(1, ANTI_PARTY).await.unwrap().is_none());
    let pro = store.party_match(1, PRO_PARTY).await.unwrap().unwrap();
    assert_eq!(pro.aggregate.total_statements, 2);

    // reprocessing: no rule fires, so the offline rule model reads neutral
    let out = engine.process_response(1).await.unwrap();
    match out.classify {
        ClassifyOutcome::Classified(o) => {
            assert_eq!(o.stance, Stance::Neutral);
            assert_eq!(o.confidence, NO_RULE_NEUTRAL);
            assert_eq!(o.source, ClassificationSource::Model);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(out.matched, Some(MatchOutcome::Matched(2)));
    let anti = store.party_match(1, ANTI_PARTY).await.unwrap().unwrap();
    assert_eq!(anti.aggregate.agreement_score, 50.0);
}

#[tokio::test]
async fn edit_rejects_out_of_range_weights() {
    let (engine, store) = seeded().await;
    assert!(engine.edit_response(1, "Ja", 0, 3).await.is_err());
    assert!(engine.edit_response(1, "Ja", 3, 6).await.is_err());
    // nothing changed
    assert_eq!(store.statement_matches_for_response(1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn user_label_override_rescores() {
    let (engine, store) = seeded().await;

    let same = engine.set_user_label(2, Stance::Agree).await.unwrap();
    assert_eq!(same.label_set_by, Some(LabelSource::Ai));

    let flipped = engine.set_user_label(2, Stance::Disagree).await.unwrap();
    assert_eq!(flipped.label, Some(Stance::Disagree));
    assert_eq!(flipped.label_set_by, Some(LabelSource::User));
    assert_eq!(
        flipped.classification.map(|c| c.stance),
        Some(Stance::Agree),
        "original classification is kept"
    );

    let m = store.statement_matches_for_response(2).await.unwrap();
    assert_eq!(m.len(), 1);
    assert_eq!(m[0].base_score, 20.0);
    let pro = store.party_match(1, PRO_PARTY).await.unwrap().unwrap();
    assert_eq!(pro.aggregate.matching_statements, 2);
}

#[tokio::test]
async fn labeled_responses_are_not_reclassified() {
    let (engine, _store) = seeded().await;
    engine.set_user_label(3, Stance::Neutral).await.unwrap();
    assert_eq!(
        engine.classify_response(3).await.unwrap(),
        ClassifyOutcome::AlreadyLabeled(Stance::Neutral)
    );
}

#[tokio::test]
async fn profile_without_matches_has_no_party_matches() {
    let store: Arc<dyn MatchStore> = Arc::new(climate_store());
    let engine = engine_over(store.clone(), offline_registry());
    assert_eq!(engine.recalculate_profile_matches(9).await.unwrap(), 0);
    assert!(store.party_matches_for_profile(9).await.unwrap().is_empty());

    // an unlabeled response produces nothing either
    engine
        .submit_response(StatementResponse::new(20, 9, 1, "Hmm", 3, 3).unwrap())
        .await
        .unwrap();
    assert_eq!(engine.match_response(20).await.unwrap(), MatchOutcome::Unlabeled);
    assert!(store.party_matches_for_profile(9).await.unwrap().is_empty());
}

#[tokio::test]
async fn submit_rejects_bad_scales() {
    let store: Arc<dyn MatchStore> = Arc::new(climate_store());
    let engine = engine_over(store, offline_registry());
    let mut r = response(30, 1, 1, "Ja");
    r.importance = 9;
    assert!(engine.submit_response(r).await.is_err());
}

#[tokio::test]
async fn failed_classification_stores_nothing() {
    let store: Arc<dyn MatchStore> = Arc::new(climate_store());
    let (registry, _) = registry_with(InMemoryModelLoader::offline().with_stance(Arc::new(FailingStanceModel)));
    let engine = engine_over(store.clone(), registry);
    engine
        .submit_response(response(1, 1, 1, "Lastige kwestie"))
        .await
        .unwrap();

    assert!(engine.classify_response(1).await.is_err());
    assert!(engine.process_response(1).await.is_err());
    let r = store.response(1).await.unwrap().unwrap();
    assert_eq!(r.label, None);
    assert_eq!(r.classification, None);
    assert_eq!(engine.unlabeled_responses(1).await.unwrap(), vec![1]);

    // forced matching skips it and carries on
    engine
        .submit_response(response(2, 1, 2, "Ja, meer natuur"))
        .await
        .unwrap();
    assert_eq!(engine.force_profile_matching(1).await.unwrap(), 1);
    assert_eq!(engine.unlabeled_responses(1).await.unwrap(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_recalculations_keep_the_newest_aggregate() {
    let flaky = Arc::new(FlakyStore::new(climate_store(), 0));
    let store: Arc<dyn MatchStore> = flaky.clone();
    let engine = engine_over(store.clone(), offline_registry());
    for r in [
        response(1, 1, 1, "Ik ben volledig voor klimaatbeleid"),
        response(2, 1, 2, "Ja, meer natuur is goed"),
    ] {
        engine.submit_response(r).await.unwrap();
    }
    engine.force_profile_matching(1).await.unwrap();
    let before = store.party_match(1, PRO_PARTY).await.unwrap().unwrap();

    // the first recalculation reads old matches and commits late
    flaky.delay_next_profile_read();
    let slow = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.recalculate_profile_matches(1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.set_user_label(2, Stance::Disagree).await.unwrap();
    slow.await.unwrap().unwrap();

    let after = store.party_match(1, PRO_PARTY).await.unwrap().unwrap();
    engine.recalculate_profile_matches(1).await.unwrap();
    let truth = store.party_match(1, PRO_PARTY).await.unwrap().unwrap();
    assert_eq!(after.aggregate, truth.aggregate);
    assert!(truth.aggregate.agreement_score < before.aggregate.agreement_score);
}
