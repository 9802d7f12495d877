//! Records the engine reads and writes, the persistence contract, and an
//! in-memory implementation (used by the batch binary and the tests).
//!
//! Persistence proper lives outside this crate; anything implementing
//! `MatchStore` can back the engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationSource;
use crate::dimensions::IdeologyVector;
use crate::matching::Aggregate;
use crate::stance::{PartyStance, Stance};

pub type ProfileId = u64;
pub type StatementId = u64;
pub type PartyId = u64;
pub type ResponseId = u64;

/// Key of one party position: (statement, party).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub statement_id: StatementId,
    pub party_id: PartyId,
}

impl PositionKey {
    pub fn new(statement_id: StatementId, party_id: PartyId) -> Self {
        Self {
            statement_id,
            party_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub text: String,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
}

/// Who set the current label of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    User,
    Ai,
}

/// Result of one classifier run, as stored on the response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub stance: Stance,
    pub confidence: f64,
    pub source: ClassificationSource,
}

/// A citizen's free-text opinion on one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementResponse {
    pub id: ResponseId,
    pub profile_id: ProfileId,
    pub statement_id: StatementId,
    pub opinion: String,
    /// 1..=5
    pub confidence: u8,
    /// 1..=5
    pub importance: u8,
    /// Current stance label (classifier or user override).
    #[serde(default)]
    pub label: Option<Stance>,
    /// Original classifier output, kept when the user overrides the label.
    #[serde(default)]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub label_set_by: Option<LabelSource>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl StatementResponse {
    pub fn new(
        id: ResponseId,
        profile_id: ProfileId,
        statement_id: StatementId,
        opinion: impl Into<String>,
        confidence: u8,
        importance: u8,
    ) -> Result<Self> {
        validate_scale("confidence", confidence)?;
        validate_scale("importance", importance)?;
        Ok(Self {
            id,
            profile_id,
            statement_id,
            opinion: opinion.into(),
            confidence,
            importance,
            label: None,
            classification: None,
            label_set_by: None,
            updated_at: Utc::now(),
        })
    }

    pub fn with_label(mut self, label: Stance) -> Self {
        self.label = Some(label);
        self.label_set_by = Some(LabelSource::User);
        self
    }
}

pub(crate) fn validate_scale(field: &str, v: u8) -> Result<()> {
    if !(1..=5).contains(&v) {
        bail!("{field} must be within 1..=5, got {v}");
    }
    Ok(())
}

/// A party's stance and explanation on one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyPosition {
    pub statement_id: StatementId,
    pub party_id: PartyId,
    pub stance: PartyStance,
    #[serde(default)]
    pub explanation: String,
    /// Write-through cache of the explanation's ideology vector.
    #[serde(default)]
    pub ideology: Option<IdeologyVector>,
}

impl PartyPosition {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.statement_id, self.party_id)
    }
}

/// Score of one (response, party) pair. Recreated, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementMatch {
    pub response_id: ResponseId,
    pub profile_id: ProfileId,
    pub statement_id: StatementId,
    pub party_id: PartyId,
    pub user_stance: Stance,
    pub party_stance: PartyStance,
    pub base_score: f64,
    pub dimension_modifier: f64,
    pub final_score: f64,
}

/// Aggregate of one (profile, party) pair. Always recomputable from its
/// statement matches; the explanation is a cache on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyMatch {
    pub profile_id: ProfileId,
    pub party_id: PartyId,
    #[serde(flatten)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Persistence contract consumed by the engine.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn statement(&self, id: StatementId) -> Result<Option<Statement>>;
    async fn party(&self, id: PartyId) -> Result<Option<Party>>;

    async fn response(&self, id: ResponseId) -> Result<Option<StatementResponse>>;
    async fn responses_for_profile(&self, profile: ProfileId) -> Result<Vec<StatementResponse>>;
    async fn profiles(&self) -> Result<Vec<ProfileId>>;
    /// Insert or replace a response as given.
    async fn put_response(&self, response: StatementResponse) -> Result<()>;
    /// Store a classification only if the response is still at `seen_updated_at`
    /// (last-writer check). Returns `false` when the result is stale.
    async fn apply_classification(
        &self,
        id: ResponseId,
        seen_updated_at: DateTime<Utc>,
        classification: Classification,
    ) -> Result<bool>;

    async fn positions_for_statement(&self, statement: StatementId) -> Result<Vec<PartyPosition>>;
    async fn position(&self, key: PositionKey) -> Result<Option<PartyPosition>>;
    async fn set_position_vector(&self, key: PositionKey, vector: IdeologyVector) -> Result<()>;

    /// Replace all statement matches of a response, guarded by the same
    /// last-writer check as `apply_classification`.
    async fn replace_statement_matches(
        &self,
        response: ResponseId,
        seen_updated_at: DateTime<Utc>,
        matches: Vec<StatementMatch>,
    ) -> Result<bool>;
    async fn delete_statement_matches(&self, response: ResponseId) -> Result<usize>;
    async fn statement_matches_for_profile(&self, profile: ProfileId) -> Result<Vec<StatementMatch>>;
    async fn statement_matches_for_response(&self, response: ResponseId) -> Result<Vec<StatementMatch>>;

    async fn party_match(&self, profile: ProfileId, party: PartyId) -> Result<Option<PartyMatch>>;
    async fn party_matches_for_profile(&self, profile: ProfileId) -> Result<Vec<PartyMatch>>;
    async fn upsert_party_match(&self, m: PartyMatch) -> Result<()>;
    async fn delete_party_match(&self, profile: ProfileId, party: PartyId) -> Result<bool>;
    async fn set_party_match_explanation(
        &self,
        profile: ProfileId,
        party: PartyId,
        explanation: Option<String>,
    ) -> Result<()>;
    /// Clear every cached explanation; returns how many were cleared.
    async fn clear_all_explanations(&self) -> Result<usize>;
}

/// Serializable dataset used to seed an `InMemoryStore`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub positions: Vec<PartyPosition>,
    #[serde(default)]
    pub responses: Vec<StatementResponse>,
}

impl Snapshot {
    pub fn from_json(raw: &str) -> Result<Self> {
        let snap: Snapshot = serde_json::from_str(raw).context("parsing snapshot JSON")?;
        for r in &snap.responses {
            validate_scale("confidence", r.confidence)
                .and_then(|_| validate_scale("importance", r.importance))
                .with_context(|| format!("response {}", r.id))?;
        }
        Ok(snap)
    }
}

#[derive(Debug, Default)]
struct Inner {
    statements: BTreeMap<StatementId, Statement>,
    parties: BTreeMap<PartyId, Party>,
    responses: BTreeMap<ResponseId, StatementResponse>,
    positions: BTreeMap<PositionKey, PartyPosition>,
    // keyed (response, party): at most one match per pair
    statement_matches: BTreeMap<(ResponseId, PartyId), StatementMatch>,
    // keyed (profile, party): at most one aggregate per pair
    party_matches: BTreeMap<(ProfileId, PartyId), PartyMatch>,
}

/// Thread-safe in-memory store with deterministic (id-ordered) iteration.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snap: Snapshot) -> Self {
        let mut inner = Inner::default();
        for s in snap.statements {
            inner.statements.insert(s.id, s);
        }
        for p in snap.parties {
            inner.parties.insert(p.id, p);
        }
        for p in snap.positions {
            inner.positions.insert(p.key(), p);
        }
        for r in snap.responses {
            inner.responses.insert(r.id, r);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn insert_statement(&self, s: Statement) -> Result<()> {
        self.write()?.statements.insert(s.id, s);
        Ok(())
    }

    pub fn insert_party(&self, p: Party) -> Result<()> {
        self.write()?.parties.insert(p.id, p);
        Ok(())
    }

    pub fn insert_position(&self, p: PartyPosition) -> Result<()> {
        self.write()?.positions.insert(p.key(), p);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("store lock poisoned"))
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn statement(&self, id: StatementId) -> Result<Option<Statement>> {
        Ok(self.read()?.statements.get(&id).cloned())
    }

    async fn party(&self, id: PartyId) -> Result<Option<Party>> {
        Ok(self.read()?.parties.get(&id).cloned())
    }

    async fn response(&self, id: ResponseId) -> Result<Option<StatementResponse>> {
        Ok(self.read()?.responses.get(&id).cloned())
    }

    async fn responses_for_profile(&self, profile: ProfileId) -> Result<Vec<StatementResponse>> {
        Ok(self
            .read()?
            .responses
            .values()
            .filter(|r| r.profile_id == profile)
            .cloned()
            .collect())
    }

    async fn profiles(&self) -> Result<Vec<ProfileId>> {
        let set: BTreeSet<ProfileId> = self
            .read()?
            .responses
            .values()
            .map(|r| r.profile_id)
            .collect();
        Ok(set.into_iter().collect())
    }

    async fn put_response(&self, response: StatementResponse) -> Result<()> {
        self.write()?.responses.insert(response.id, response);
        Ok(())
    }

    async fn apply_classification(
        &self,
        id: ResponseId,
        seen_updated_at: DateTime<Utc>,
        classification: Classification,
    ) -> Result<bool> {
        let mut g = self.write()?;
        let Some(r) = g.responses.get_mut(&id) else {
            bail!("response {id} not found");
        };
        if r.updated_at != seen_updated_at {
            return Ok(false);
        }
        r.label = Some(classification.stance);
        r.classification = Some(classification);
        r.label_set_by = Some(LabelSource::Ai);
        Ok(true)
    }

    async fn positions_for_statement(&self, statement: StatementId) -> Result<Vec<PartyPosition>> {
        Ok(self
            .read()?
            .positions
            .values()
            .filter(|p| p.statement_id == statement)
            .cloned()
            .collect())
    }

    async fn position(&self, key: PositionKey) -> Result<Option<PartyPosition>> {
        Ok(self.read()?.positions.get(&key).cloned())
    }

    async fn set_position_vector(&self, key: PositionKey, vector: IdeologyVector) -> Result<()> {
        let mut g = self.write()?;
        let pos = g
            .positions
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no position for {key:?}"))?;
        pos.ideology = Some(vector);
        Ok(())
    }

    async fn replace_statement_matches(
        &self,
        response: ResponseId,
        seen_updated_at: DateTime<Utc>,
        matches: Vec<StatementMatch>,
    ) -> Result<bool> {
        let mut g = self.write()?;
        match g.responses.get(&response) {
            Some(r) if r.updated_at == seen_updated_at => {}
            Some(_) => return Ok(false),
            None => bail!("response {response} not found"),
        }
        g.statement_matches.retain(|(rid, _), _| *rid != response);
        for m in matches {
            g.statement_matches.insert((m.response_id, m.party_id), m);
        }
        Ok(true)
    }

    async fn delete_statement_matches(&self, response: ResponseId) -> Result<usize> {
        let mut g = self.write()?;
        let before = g.statement_matches.len();
        g.statement_matches.retain(|(rid, _), _| *rid != response);
        Ok(before - g.statement_matches.len())
    }

    async fn statement_matches_for_profile(&self, profile: ProfileId) -> Result<Vec<StatementMatch>> {
        Ok(self
            .read()?
            .statement_matches
            .values()
            .filter(|m| m.profile_id == profile)
            .cloned()
            .collect())
    }

    async fn statement_matches_for_response(&self, response: ResponseId) -> Result<Vec<StatementMatch>> {
        Ok(self
            .read()?
            .statement_matches
            .values()
            .filter(|m| m.response_id == response)
            .cloned()
            .collect())
    }

    async fn party_match(&self, profile: ProfileId, party: PartyId) -> Result<Option<PartyMatch>> {
        Ok(self.read()?.party_matches.get(&(profile, party)).cloned())
    }

    async fn party_matches_for_profile(&self, profile: ProfileId) -> Result<Vec<PartyMatch>> {
        Ok(self
            .read()?
            .party_matches
            .values()
            .filter(|m| m.profile_id == profile)
            .cloned()
            .collect())
    }

    async fn upsert_party_match(&self, m: PartyMatch) -> Result<()> {
        self.write()?.party_matches.insert((m.profile_id, m.party_id), m);
        Ok(())
    }

    async fn delete_party_match(&self, profile: ProfileId, party: PartyId) -> Result<bool> {
        Ok(self.write()?.party_matches.remove(&(profile, party)).is_some())
    }

    async fn set_party_match_explanation(
        &self,
        profile: ProfileId,
        party: PartyId,
        explanation: Option<String>,
    ) -> Result<()> {
        let mut g = self.write()?;
        let m = g
            .party_matches
            .get_mut(&(profile, party))
            .ok_or_else(|| anyhow!("no party match for profile {profile}, party {party}"))?;
        m.explanation = explanation;
        Ok(())
    }

    async fn clear_all_explanations(&self) -> Result<usize> {
        let mut g = self.write()?;
        let mut n = 0;
        for m in g.party_matches.values_mut() {
            if m.explanation.take().is_some() {
                n += 1;
            }
        }
        Ok(n)
    }
}
