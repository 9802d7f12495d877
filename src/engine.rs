//! Match engine: the response lifecycle over a `MatchStore`.
//!
//! classify → score against every party position → re-aggregate the profile.
//! Every write that depends on a response's text is guarded by its
//! `updated_at` (last-writer check); a stale result is reported, never stored.
//! Re-aggregation of a profile runs one at a time, so the last run always
//! reads the latest statement matches.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::classify::{StanceClassifier, StanceOutcome};
use crate::config::{AggregationConfig, MatcherConfig};
use crate::dimensions::{DimensionScorer, IdeologyVector, ModelRegistry};
use crate::matching::{
    aggregate, score_with_vectors, PartyInput, PartyVectorCache, StatementMatcher, StatementScore,
    WeightedScore, GENERIC_STATEMENT,
};
use crate::stance::{PartyStance, Stance};
use crate::store::{
    validate_scale, Classification, LabelSource, MatchStore, PartyMatch, ProfileId, ResponseId,
    StatementMatch, StatementResponse,
};
use crate::telemetry::anon_hash;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifyOutcome {
    Classified(StanceOutcome),
    /// The response already carries a label; nothing was run.
    AlreadyLabeled(Stance),
    /// The response changed while classifying; result dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Number of statement matches written.
    Matched(usize),
    /// No label yet; nothing to score.
    Unlabeled,
    Stale,
}

/// Result of the full classify → match → aggregate chain for one response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessOutcome {
    pub classify: ClassifyOutcome,
    pub matched: Option<MatchOutcome>,
    pub party_matches_updated: usize,
}

impl ProcessOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self.classify, ClassifyOutcome::Stale)
            || matches!(self.matched, Some(MatchOutcome::Stale))
    }
}

pub struct MatchEngine {
    store: Arc<dyn MatchStore>,
    classifier: Arc<StanceClassifier>,
    matcher: StatementMatcher,
    vectors: PartyVectorCache,
    aggregation: AggregationConfig,
    profile_locks: Mutex<HashMap<ProfileId, Arc<tokio::sync::Mutex<()>>>>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn MatchStore>, registry: Arc<ModelRegistry>, cfg: &MatcherConfig) -> Self {
        let classifier = Arc::new(
            StanceClassifier::new(registry.clone())
                .with_neutral_threshold(cfg.classifier.neutral_threshold),
        );
        let scorer = DimensionScorer::new(registry);
        Self {
            vectors: PartyVectorCache::new(store.clone(), scorer.clone()),
            matcher: StatementMatcher::new(scorer, classifier.clone(), cfg.scoring.clone()),
            classifier,
            store,
            aggregation: cfg.aggregation.clone(),
            profile_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn classifier(&self) -> &StanceClassifier {
        &self.classifier
    }

    pub fn matcher(&self) -> &StatementMatcher {
        &self.matcher
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.matcher.scorer().registry()
    }

    /// Stance of a free-text reaction to a statement. Never fails.
    pub async fn classify_stance(&self, statement: &str, reaction: &str) -> StanceOutcome {
        self.classifier.classify_stance(statement, reaction).await
    }

    /// 0–100 score of one opinion against one party position. Never fails;
    /// any model trouble only shrinks the ideology modifier.
    pub async fn score_statement_match(
        &self,
        user_stance: Stance,
        user_opinion: &str,
        party_stance: PartyStance,
        party_explanation: &str,
        party_vector: Option<IdeologyVector>,
    ) -> f64 {
        let party = PartyInput {
            party_id: 0,
            stance: party_stance,
            explanation: party_explanation.to_string(),
            ideology: party_vector,
        };
        self.matcher
            .score_statement_match(user_stance, user_opinion, &party)
            .await
    }

    pub async fn rank_parties(
        &self,
        user_opinion: &str,
        user_stance: Option<Stance>,
        parties: &[PartyInput],
        statement: Option<&str>,
    ) -> Result<Vec<StatementScore>> {
        self.matcher
            .rank_parties(user_opinion, user_stance, parties, statement)
            .await
    }

    /// Store a new response. Scales are checked before anything is written.
    pub async fn submit_response(&self, response: StatementResponse) -> Result<ResponseId> {
        validate_scale("confidence", response.confidence)?;
        validate_scale("importance", response.importance)?;
        let id = response.id;
        debug!(target: "engine", response = id, opinion = %anon_hash(&response.opinion), "response submitted");
        self.store.put_response(response).await?;
        Ok(id)
    }

    /// Replace the text and weights of a response. Its label, classification
    /// and statement matches are dropped and the profile re-aggregated, so
    /// the response has to be processed again.
    pub async fn edit_response(
        &self,
        id: ResponseId,
        opinion: impl Into<String>,
        confidence: u8,
        importance: u8,
    ) -> Result<StatementResponse> {
        validate_scale("confidence", confidence)?;
        validate_scale("importance", importance)?;
        let mut r = self.load_response(id).await?;
        r.opinion = opinion.into();
        r.confidence = confidence;
        r.importance = importance;
        r.label = None;
        r.classification = None;
        r.label_set_by = None;
        r.updated_at = next_revision(r.updated_at);
        self.store.put_response(r.clone()).await?;

        let dropped = self.store.delete_statement_matches(id).await?;
        info!(target: "engine", response = id, dropped, "response edited");
        self.recalculate_profile_matches(r.profile_id).await?;
        Ok(r)
    }

    /// Run the classifier on an unlabeled response and store the result.
    /// A failing stance model is an error and nothing is stored, so the
    /// caller can retry.
    pub async fn classify_response(&self, id: ResponseId) -> Result<ClassifyOutcome> {
        let r = self.load_response(id).await?;
        if let Some(label) = r.label {
            return Ok(ClassifyOutcome::AlreadyLabeled(label));
        }

        let statement = match self.store.statement(r.statement_id).await? {
            Some(s) => s.text,
            None => {
                warn!(target: "engine", response = id, statement = r.statement_id, "statement missing; classifying against generic text");
                GENERIC_STATEMENT.to_string()
            }
        };
        let outcome = self
            .classifier
            .try_classify(&statement, &r.opinion)
            .await
            .with_context(|| format!("classifying response {id}"))?;
        let c = Classification {
            stance: outcome.stance,
            confidence: outcome.confidence,
            source: outcome.source,
        };
        if !self.store.apply_classification(id, r.updated_at, c).await? {
            info!(target: "engine", response = id, "classification stale; discarded");
            return Ok(ClassifyOutcome::Stale);
        }
        Ok(ClassifyOutcome::Classified(outcome))
    }

    /// User override of a response label. The label source stays `Ai` when
    /// the user picks what the classifier said. Re-scores and re-aggregates.
    pub async fn set_user_label(&self, id: ResponseId, label: Stance) -> Result<StatementResponse> {
        let mut r = self.load_response(id).await?;
        let classified = r.classification.map(|c| c.stance);
        r.label = Some(label);
        r.label_set_by = Some(if classified == Some(label) {
            LabelSource::Ai
        } else {
            LabelSource::User
        });
        r.updated_at = next_revision(r.updated_at);
        self.store.put_response(r.clone()).await?;

        self.match_response(id).await?;
        self.recalculate_profile_matches(r.profile_id).await?;
        Ok(r)
    }

    /// Score a labeled response against every party position of its
    /// statement, replacing its statement matches wholesale.
    pub async fn match_response(&self, id: ResponseId) -> Result<MatchOutcome> {
        let r = self.load_response(id).await?;
        let Some(user_stance) = r.label else {
            return Ok(MatchOutcome::Unlabeled);
        };

        let positions = self.store.positions_for_statement(r.statement_id).await?;
        let user_vec = self.matcher.scorer().score(&r.opinion).await;
        let mut matches = Vec::with_capacity(positions.len());
        for position in &positions {
            let Some(party_vec) = self.vectors.get_or_compute_vector(position.key()).await? else {
                continue;
            };
            let input = PartyInput::from(position);
            let s = score_with_vectors(user_stance, &user_vec, &input, &party_vec, self.matcher.config());
            matches.push(StatementMatch {
                response_id: r.id,
                profile_id: r.profile_id,
                statement_id: r.statement_id,
                party_id: position.party_id,
                user_stance,
                party_stance: position.stance,
                base_score: s.base_score,
                dimension_modifier: s.dimension_modifier,
                final_score: s.final_score,
            });
        }

        let n = matches.len();
        if !self
            .store
            .replace_statement_matches(id, r.updated_at, matches)
            .await?
        {
            info!(target: "engine", response = id, "statement matches stale; discarded");
            return Ok(MatchOutcome::Stale);
        }
        counter!("matcher_statement_matches_total").increment(n as u64);
        debug!(target: "engine", response = id, parties = n, "response matched");
        Ok(MatchOutcome::Matched(n))
    }

    /// Re-aggregate every party of a profile from its current statement
    /// matches. Parties left without matches lose their party match. The
    /// cached explanation survives only when the aggregate is unchanged.
    /// Returns the number of party matches written.
    pub async fn recalculate_profile_matches(&self, profile: ProfileId) -> Result<usize> {
        let lock = self.profile_lock(profile);
        let result = {
            let _guard = lock.lock().await;
            self.aggregate_profile(profile).await
        };
        self.release_profile_lock(profile, lock);
        result
    }

    async fn aggregate_profile(&self, profile: ProfileId) -> Result<usize> {
        let responses: BTreeMap<ResponseId, StatementResponse> = self
            .store
            .responses_for_profile(profile)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let labeled = responses.values().filter(|r| r.label.is_some()).count();

        let mut per_party: BTreeMap<_, Vec<WeightedScore>> = BTreeMap::new();
        for m in self.store.statement_matches_for_profile(profile).await? {
            let Some(r) = responses.get(&m.response_id) else {
                continue;
            };
            per_party
                .entry(m.party_id)
                .or_default()
                .push(WeightedScore::new(m.final_score, r.confidence, r.importance));
        }

        let mut written = 0usize;
        let mut kept = BTreeSet::new();
        for (party, scores) in &per_party {
            let Some(agg) = aggregate(scores, labeled, &self.aggregation) else {
                continue;
            };
            let previous = self.store.party_match(profile, *party).await?;
            let explanation = previous
                .filter(|p| p.aggregate == agg)
                .and_then(|p| p.explanation);
            self.store
                .upsert_party_match(PartyMatch {
                    profile_id: profile,
                    party_id: *party,
                    aggregate: agg,
                    explanation,
                })
                .await?;
            kept.insert(*party);
            written += 1;
        }

        for existing in self.store.party_matches_for_profile(profile).await? {
            if !kept.contains(&existing.party_id) {
                self.store.delete_party_match(profile, existing.party_id).await?;
                debug!(target: "engine", profile, party = existing.party_id, "party match removed");
            }
        }

        counter!("matcher_party_matches_total").increment(written as u64);
        info!(target: "engine", profile, labeled, parties = written, "profile re-aggregated");
        Ok(written)
    }

    /// classify → match → re-aggregate for one response.
    pub async fn process_response(&self, id: ResponseId) -> Result<ProcessOutcome> {
        let classify = self.classify_response(id).await?;
        if classify == ClassifyOutcome::Stale {
            return Ok(ProcessOutcome {
                classify,
                matched: None,
                party_matches_updated: 0,
            });
        }
        let mut matched = self.match_response(id).await?;
        if matches!(classify, ClassifyOutcome::Classified(_)) && matched == MatchOutcome::Unlabeled {
            // label cleared by an edit after classification
            info!(target: "engine", response = id, "label gone before matching; discarded");
            matched = MatchOutcome::Stale;
        }
        let party_matches_updated = if matched == MatchOutcome::Stale {
            0
        } else {
            let profile = self.load_response(id).await?.profile_id;
            self.recalculate_profile_matches(profile).await?
        };
        Ok(ProcessOutcome {
            classify,
            matched: Some(matched),
            party_matches_updated,
        })
    }

    /// Fill in whatever is missing for a profile: classify unlabeled
    /// responses, match responses without statement matches, then
    /// re-aggregate.
    pub async fn force_profile_matching(&self, profile: ProfileId) -> Result<usize> {
        let mut created = 0usize;
        for r in self.store.responses_for_profile(profile).await? {
            if r.label.is_none() {
                if let Err(e) = self.classify_response(r.id).await {
                    warn!(target: "engine", response = r.id, error = %e, "classification failed; response left unlabeled");
                    continue;
                }
            }
            if self.store.statement_matches_for_response(r.id).await?.is_empty() {
                if let MatchOutcome::Matched(n) = self.match_response(r.id).await? {
                    created += n;
                }
            }
        }
        info!(target: "engine", profile, created, "forced profile matching");
        self.recalculate_profile_matches(profile).await
    }

    /// Responses of a profile still waiting for a label.
    pub async fn unlabeled_responses(&self, profile: ProfileId) -> Result<Vec<ResponseId>> {
        Ok(self
            .store
            .responses_for_profile(profile)
            .await?
            .into_iter()
            .filter(|r| r.label.is_none())
            .map(|r| r.id)
            .collect())
    }

    fn profile_lock(&self, profile: ProfileId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.profile_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(profile).or_default().clone()
    }

    /// Drop the profile's lock entry once no other caller holds a handle.
    fn release_profile_lock(&self, profile: ProfileId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.profile_locks.lock().unwrap_or_else(|e| e.into_inner());
        // one handle in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&profile);
        }
    }

    async fn load_response(&self, id: ResponseId) -> Result<StatementResponse> {
        self.store
            .response(id)
            .await?
            .ok_or_else(|| anyhow!("response {id} not found"))
    }
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEngine")
            .field("classifier", &self.classifier)
            .field("aggregation", &self.aggregation)
            .finish()
    }
}

/// Strictly later than `prev`, even when the clock has not moved.
fn next_revision(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev {
        now
    } else {
        prev + chrono::Duration::microseconds(1)
    }
}
