// tests/common/mod.rs
//
// Shared fixtures: a small Dutch climate dataset, offline models and a store
// wrapper that misbehaves on demand.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use politiek_matcher::config::{MatcherConfig, WorkerConfig};
use politiek_matcher::dimensions::IdeologyVector;
use politiek_matcher::models::mock::InMemoryModelLoader;
use politiek_matcher::models::{ClassProbabilities, ModelLoader, StanceModel, TextPair};
use politiek_matcher::store::{
    Classification, InMemoryStore, MatchStore, Party, PartyId, PartyMatch, PartyPosition,
    PositionKey, ProfileId, ResponseId, Statement, StatementId, StatementMatch, StatementResponse,
};
use politiek_matcher::{MatchEngine, ModelRegistry, PartyStance};

pub const CLIMATE_STATEMENT: &str = "Klimaatbeleid is belangrijk";
pub const PRO_EXPLANATION: &str =
    "Wij willen ambitieus klimaatbeleid en investeren in duurzame energie en natuur.";
pub const ANTI_EXPLANATION: &str =
    "Klimaatbeleid is te duur; wij kiezen voor fossiele brandstoffen.";

pub const PRO_PARTY: PartyId = 1;
pub const ANTI_PARTY: PartyId = 2;

pub fn offline_registry() -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::new(Arc::new(InMemoryModelLoader::offline())))
}

pub fn registry_with(loader: InMemoryModelLoader) -> (Arc<ModelRegistry>, Arc<InMemoryModelLoader>) {
    let loader = Arc::new(loader);
    let dyn_loader: Arc<dyn ModelLoader> = loader.clone();
    (Arc::new(ModelRegistry::new(dyn_loader)), loader)
}

pub fn position(statement: StatementId, party: PartyId, stance: PartyStance, text: &str) -> PartyPosition {
    PartyPosition {
        statement_id: statement,
        party_id: party,
        stance,
        explanation: text.to_string(),
        ideology: None,
    }
}

/// Three statements; the anti party only has a position on the first.
pub fn climate_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    let statements = [
        (1, CLIMATE_STATEMENT, "Klimaat"),
        (2, "Er moet meer geld naar de natuur", "Klimaat"),
        (3, "De overheid moet duurzame energie subsidiëren", "Energie"),
    ];
    for (id, text, topic) in statements {
        store
            .insert_statement(Statement {
                id,
                text: text.to_string(),
                topic: Some(topic.to_string()),
            })
            .unwrap();
    }
    store
        .insert_party(Party {
            id: PRO_PARTY,
            name: "Groene Partij".into(),
            abbreviation: Some("GP".into()),
        })
        .unwrap();
    store
        .insert_party(Party {
            id: ANTI_PARTY,
            name: "Fossiele Partij".into(),
            abbreviation: Some("FP".into()),
        })
        .unwrap();

    store
        .insert_position(position(1, PRO_PARTY, PartyStance::StronglyAgree, PRO_EXPLANATION))
        .unwrap();
    store
        .insert_position(position(1, ANTI_PARTY, PartyStance::StronglyDisagree, ANTI_EXPLANATION))
        .unwrap();
    store
        .insert_position(position(2, PRO_PARTY, PartyStance::Agree, "Meer natuur en bescherming van het klimaat."))
        .unwrap();
    store
        .insert_position(position(3, PRO_PARTY, PartyStance::Agree, "Subsidie voor duurzame energie."))
        .unwrap();
    store
}

pub fn response(id: ResponseId, profile: ProfileId, statement: StatementId, opinion: &str) -> StatementResponse {
    StatementResponse::new(id, profile, statement, opinion, 5, 5).unwrap()
}

pub fn fast_config() -> MatcherConfig {
    let mut cfg = MatcherConfig::default();
    cfg.worker = fast_worker();
    cfg
}

pub fn fast_worker() -> WorkerConfig {
    WorkerConfig {
        pool_size: 2,
        max_attempts: 3,
        backoff_base_ms: 1,
        poll_interval_ms: 5,
    }
}

pub fn engine_over(store: Arc<dyn MatchStore>, registry: Arc<ModelRegistry>) -> Arc<MatchEngine> {
    Arc::new(MatchEngine::new(store, registry, &fast_config()))
}

/// Stance model that answers after a delay.
pub struct SlowStanceModel {
    pub delay: Duration,
    pub probs: ClassProbabilities,
}

#[async_trait]
impl StanceModel for SlowStanceModel {
    async fn classify(&self, _pair: &TextPair<'_>) -> Result<ClassProbabilities> {
        tokio::time::sleep(self.delay).await;
        Ok(self.probs)
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Stance model that errors on its first `failures` calls, then answers.
pub struct FlakyStanceModel {
    pub failures: AtomicUsize,
    pub calls: AtomicUsize,
    pub probs: ClassProbabilities,
}

impl FlakyStanceModel {
    pub fn new(failures: usize, probs: ClassProbabilities) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            probs,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StanceModel for FlakyStanceModel {
    async fn classify(&self, _pair: &TextPair<'_>) -> Result<ClassProbabilities> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("inference server timed out");
        }
        Ok(self.probs)
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Delegating store. `response` lookups fail for the first `failures` calls;
/// optionally the next profile read is served late with the data it saw
/// before sleeping, or every applied classification is followed at once by
/// a user edit that clears the label.
pub struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicUsize,
    slow_profile_read: AtomicBool,
    edit_after_classification: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            slow_profile_read: AtomicBool::new(false),
            edit_after_classification: AtomicBool::new(false),
        }
    }

    /// The next `statement_matches_for_profile` returns a 200 ms old snapshot.
    pub fn delay_next_profile_read(&self) {
        self.slow_profile_read.store(true, Ordering::SeqCst);
    }

    pub fn editing_after_classification(self) -> Self {
        self.edit_after_classification.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl MatchStore for FlakyStore {
    async fn statement(&self, id: StatementId) -> Result<Option<Statement>> {
        self.inner.statement(id).await
    }
    async fn party(&self, id: PartyId) -> Result<Option<Party>> {
        self.inner.party(id).await
    }
    async fn response(&self, id: ResponseId) -> Result<Option<StatementResponse>> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            bail!("database connection reset");
        }
        self.inner.response(id).await
    }
    async fn responses_for_profile(&self, profile: ProfileId) -> Result<Vec<StatementResponse>> {
        self.inner.responses_for_profile(profile).await
    }
    async fn profiles(&self) -> Result<Vec<ProfileId>> {
        self.inner.profiles().await
    }
    async fn put_response(&self, response: StatementResponse) -> Result<()> {
        self.inner.put_response(response).await
    }
    async fn apply_classification(
        &self,
        id: ResponseId,
        seen_updated_at: DateTime<Utc>,
        classification: Classification,
    ) -> Result<bool> {
        let applied = self
            .inner
            .apply_classification(id, seen_updated_at, classification)
            .await?;
        if applied && self.edit_after_classification.load(Ordering::SeqCst) {
            if let Some(mut r) = self.inner.response(id).await? {
                r.opinion = format!("{} (aangepast)", r.opinion);
                r.label = None;
                r.classification = None;
                r.label_set_by = None;
                r.updated_at = r.updated_at + chrono::Duration::seconds(1);
                self.inner.put_response(r).await?;
            }
        }
        Ok(applied)
    }
    async fn positions_for_statement(&self, statement: StatementId) -> Result<Vec<PartyPosition>> {
        self.inner.positions_for_statement(statement).await
    }
    async fn position(&self, key: PositionKey) -> Result<Option<PartyPosition>> {
        self.inner.position(key).await
    }
    async fn set_position_vector(&self, key: PositionKey, vector: IdeologyVector) -> Result<()> {
        self.inner.set_position_vector(key, vector).await
    }
    async fn replace_statement_matches(
        &self,
        response: ResponseId,
        seen_updated_at: DateTime<Utc>,
        matches: Vec<StatementMatch>,
    ) -> Result<bool> {
        self.inner
            .replace_statement_matches(response, seen_updated_at, matches)
            .await
    }
    async fn delete_statement_matches(&self, response: ResponseId) -> Result<usize> {
        self.inner.delete_statement_matches(response).await
    }
    async fn statement_matches_for_profile(&self, profile: ProfileId) -> Result<Vec<StatementMatch>> {
        let snapshot = self.inner.statement_matches_for_profile(profile).await?;
        if self.slow_profile_read.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(snapshot)
    }
    async fn statement_matches_for_response(&self, response: ResponseId) -> Result<Vec<StatementMatch>> {
        self.inner.statement_matches_for_response(response).await
    }
    async fn party_match(&self, profile: ProfileId, party: PartyId) -> Result<Option<PartyMatch>> {
        self.inner.party_match(profile, party).await
    }
    async fn party_matches_for_profile(&self, profile: ProfileId) -> Result<Vec<PartyMatch>> {
        self.inner.party_matches_for_profile(profile).await
    }
    async fn upsert_party_match(&self, m: PartyMatch) -> Result<()> {
        self.inner.upsert_party_match(m).await
    }
    async fn delete_party_match(&self, profile: ProfileId, party: PartyId) -> Result<bool> {
        self.inner.delete_party_match(profile, party).await
    }
    async fn set_party_match_explanation(
        &self,
        profile: ProfileId,
        party: PartyId,
        explanation: Option<String>,
    ) -> Result<()> {
        self.inner
            .set_party_match_explanation(profile, party, explanation)
            .await
    }
    async fn clear_all_explanations(&self) -> Result<usize> {
        self.inner.clear_all_explanations().await
    }
}
