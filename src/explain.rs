//! Explanation cache for party matches.
//!
//! The text itself comes from a `TextGenerator` collaborator; this module
//! builds the prompt, stores the result on the party match and returns the
//! stored text unchanged on later calls. A failing generator yields a
//! deterministic summary, which is cached the same way.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ai::AiConfig;
use crate::store::{MatchStore, PartyId, PartyMatch, ProfileId, StatementMatch};

pub const SYSTEM_PROMPT: &str = "Je bent een neutrale politieke analist. Je legt in helder Nederlands uit waarom een partij wel of niet aansluit bij een kiezer, zonder eigen oordeel.";

pub const DISCLAIMER: &str = "\n\n---\n*Deze uitleg is automatisch gegenereerd uit jouw antwoorden en de standpunten van de partij. Kijk voor actuele standpunten op de website van de partij.*";

const TOP_TOPICS: usize = 5;
const TOP_STATEMENTS: usize = 3;
const HIGH_MATCH: f64 = 70.0;
const STATEMENT_PREVIEW_CHARS: usize = 100;
const NO_TOPIC: &str = "Overig";

/// Text-generation collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Always fails, so callers get the fallback summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
        bail!("text generation disabled")
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// OpenAI chat completions.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("politiek-matcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .context("building OpenAI HTTP client")?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("no OpenAI API key configured");
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("OpenAI request")?
            .error_for_status()
            .context("OpenAI status")?;
        let body: Resp = resp.json().await.context("OpenAI body")?;
        let text = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            bail!("OpenAI returned an empty completion");
        }
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Generator for a config: OpenAI when enabled, otherwise disabled.
pub fn generator_from_config(cfg: &AiConfig) -> Result<Arc<dyn TextGenerator>> {
    if !cfg.enabled {
        return Ok(Arc::new(DisabledGenerator));
    }
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGenerator::new(cfg)?)),
        other => Err(anyhow!("unsupported text generator provider: {other}")),
    }
}

/// One statement match with the context the prompt needs.
#[derive(Debug, Clone)]
struct PromptLine {
    topic: String,
    statement: String,
    m: StatementMatch,
}

pub struct ExplanationService {
    store: Arc<dyn MatchStore>,
    generator: Arc<dyn TextGenerator>,
}

impl ExplanationService {
    pub fn new(store: Arc<dyn MatchStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { store, generator }
    }

    /// Cached explanation if present, else generate, cache and return one.
    /// Only the stored party match counts; the passed copy just names it.
    pub async fn explain_match(&self, party_match: &PartyMatch) -> Result<String> {
        let (profile, party) = (party_match.profile_id, party_match.party_id);
        let current = self
            .store
            .party_match(profile, party)
            .await?
            .ok_or_else(|| anyhow!("no party match for profile {profile} and party {party}"))?;
        if let Some(text) = current.explanation.clone() {
            info!(target: "explain", profile, party, "cached explanation");
            return Ok(text);
        }

        let party_name = self
            .store
            .party(party)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| format!("Partij {party}"));
        let lines = self.prompt_lines(profile, party).await?;
        let prompt = build_prompt(&party_name, &current, &lines);

        let text = match self.generator.generate(SYSTEM_PROMPT, &prompt).await {
            Ok(body) => format!("{body}{DISCLAIMER}"),
            Err(e) => {
                warn!(target: "explain", profile, party, generator = self.generator.name(), error = %e, "generation failed; using summary");
                fallback_explanation(&party_name, &current)
            }
        };

        if let Err(e) = self
            .store
            .set_party_match_explanation(profile, party, Some(text.clone()))
            .await
        {
            warn!(target: "explain", profile, party, error = ?e, "could not cache explanation");
        }
        Ok(text)
    }

    pub async fn clear_cached_explanation(&self, profile: ProfileId, party: PartyId) -> Result<()> {
        self.store.set_party_match_explanation(profile, party, None).await?;
        info!(target: "explain", profile, party, "cleared cached explanation");
        Ok(())
    }

    pub async fn clear_all_cached_explanations(&self) -> Result<usize> {
        let n = self.store.clear_all_explanations().await?;
        info!(target: "explain", count = n, "cleared cached explanations");
        Ok(n)
    }

    async fn prompt_lines(&self, profile: ProfileId, party: PartyId) -> Result<Vec<PromptLine>> {
        let mut out = Vec::new();
        for m in self.store.statement_matches_for_profile(profile).await? {
            if m.party_id != party {
                continue;
            }
            let (topic, statement) = match self.store.statement(m.statement_id).await? {
                Some(s) => (s.topic.unwrap_or_else(|| NO_TOPIC.to_string()), s.text),
                None => (NO_TOPIC.to_string(), format!("Stelling {}", m.statement_id)),
            };
            out.push(PromptLine { topic, statement, m });
        }
        Ok(out)
    }
}

fn average(lines: &[&PromptLine]) -> f64 {
    if lines.is_empty() {
        0.0
    } else {
        lines.iter().map(|l| l.m.final_score).sum::<f64>() / lines.len() as f64
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > STATEMENT_PREVIEW_CHARS {
        let cut: String = text.chars().take(STATEMENT_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Topics sorted by average score (best first, ties by name), top five,
/// each with its three best statements.
fn build_prompt(party: &str, m: &PartyMatch, lines: &[PromptLine]) -> String {
    let a = &m.aggregate;
    let pct = a.match_percentage;
    let mut p = String::new();
    let _ = writeln!(
        p,
        "Leg uit waarom {party} voor {pct:.1}% overeenkomt met de politieke voorkeuren van een Nederlandse kiezer.\n"
    );
    let _ = writeln!(p, "**GEGEVENS**");
    let _ = writeln!(p, "- Partij: {party}");
    let _ = writeln!(p, "- Totale match: {pct:.1}%");
    let _ = writeln!(p, "- Stellingen: {} (waarvan {} overeenkomend)", a.total_statements, a.matching_statements);
    let _ = writeln!(p, "- Score gewogen naar zekerheid: {:.1}%", a.confidence_weighted_score);
    let _ = writeln!(p, "- Score gewogen naar belang: {:.1}%", a.importance_weighted_score);
    let _ = writeln!(p, "\n**ONDERWERPEN**");

    let mut by_topic: BTreeMap<&str, Vec<&PromptLine>> = BTreeMap::new();
    for l in lines {
        by_topic.entry(l.topic.as_str()).or_default().push(l);
    }
    let mut topics: Vec<(&str, Vec<&PromptLine>)> = by_topic.into_iter().collect();
    topics.sort_by(|(na, a), (nb, b)| average(b).total_cmp(&average(a)).then_with(|| na.cmp(nb)));

    for (topic, mut group) in topics.into_iter().take(TOP_TOPICS) {
        let high = group.iter().filter(|l| l.m.final_score >= HIGH_MATCH).count();
        let _ = writeln!(
            p,
            "\n**{topic}** (gemiddeld {:.0}%, {high}/{} stellingen met hoge match):",
            average(&group),
            group.len()
        );
        group.sort_by(|a, b| b.m.final_score.total_cmp(&a.m.final_score));
        for l in group.into_iter().take(TOP_STATEMENTS) {
            let _ = writeln!(p, "- Stelling: {}", preview(&l.statement));
            let _ = writeln!(
                p,
                "  Jouw standpunt: {} | {party}: {} | Match: {:.0}%",
                l.m.user_stance, l.m.party_stance, l.m.final_score
            );
        }
    }

    let _ = write!(
        p,
        "\n**OPBOUW**\n\
         ## Match Overzicht\n\
         ## Belangrijkste Overeenkomsten\n\
         ## Grootste Verschillen\n\
         ## Conclusie\n\n\
         Schrijf neutraal, in de tweede persoon, maximaal 600 woorden, met concrete voorbeelden en zonder jargon."
    );
    p
}

/// Summary used when no generated text is available.
pub fn fallback_explanation(party: &str, m: &PartyMatch) -> String {
    let a = &m.aggregate;
    format!(
        "## Match Overzicht\n\n\
         Je komt voor {:.1}% overeen met {party}.\n\n\
         ## Samenvatting\n\n\
         Van de {} stellingen waarop {party} een standpunt heeft, komen er {} overeen met jouw antwoord.\n\n\
         ## Details\n\n\
         - **Match:** {:.1}%\n\
         - **Gewogen naar zekerheid:** {:.1}%\n\
         - **Gewogen naar belang:** {:.1}%\n\n\
         ---\n\
         *Een uitgebreide uitleg kon niet worden gemaakt; dit is een samenvatting van je match.*",
        a.match_percentage,
        a.total_statements,
        a.matching_statements,
        a.match_percentage,
        a.confidence_weighted_score,
        a.importance_weighted_score,
    )
}
