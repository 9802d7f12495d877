//! Model server client (reqwest).
//!
//! Routes:
//! - `POST {endpoint}/classify`            `{"text"}` → `{"scores":[{"label","score"}]}`
//! - `GET  {endpoint}/axes/{axis}`         availability probe on load
//! - `POST {endpoint}/axes/{axis}/score`   `{"text"}` → `{"score"}`
//! - `POST {endpoint}/release`             best-effort accelerator release

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AxisModel, ClassProbabilities, ModelLoader, StanceModel, TextPair};
use crate::config::ModelServerConfig;
use crate::dimensions::Axis;

#[derive(Serialize)]
struct TextReq<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Deserialize)]
struct ClassifyResp {
    scores: Vec<LabelScore>,
}

#[derive(Deserialize)]
struct AxisResp {
    score: f64,
}

#[derive(Clone)]
pub struct ModelServerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ModelServerClient {
    pub fn new(cfg: &ModelServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("politiek-matcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("building model server HTTP client")?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }
}

#[async_trait]
impl ModelLoader for ModelServerClient {
    async fn load_stance_model(&self) -> Result<Arc<dyn StanceModel>> {
        Ok(Arc::new(HttpStanceModel {
            client: self.clone(),
        }))
    }

    async fn load_axis_model(&self, axis: Axis) -> Result<Arc<dyn AxisModel>> {
        let resp = self
            .http
            .get(self.url(&format!("axes/{}", axis.name())))
            .send()
            .await
            .with_context(|| format!("probing axis model {axis}"))?;
        if !resp.status().is_success() {
            bail!("axis model {axis} not served (HTTP {})", resp.status());
        }
        Ok(Arc::new(HttpAxisModel {
            client: self.clone(),
            axis,
        }))
    }

    async fn release_accelerator_memory(&self) {
        match self.http.post(self.url("release")).send().await {
            Ok(r) if r.status().is_success() => {
                debug!(target: "models", "accelerator memory released")
            }
            Ok(r) => warn!(target: "models", status = %r.status(), "release request refused"),
            Err(e) => warn!(target: "models", error = ?e, "release request failed"),
        }
    }

    fn name(&self) -> &'static str {
        "model-server"
    }
}

/// Remote 3-class stance classifier.
pub struct HttpStanceModel {
    client: ModelServerClient,
}

#[async_trait]
impl StanceModel for HttpStanceModel {
    async fn classify(&self, pair: &TextPair<'_>) -> Result<ClassProbabilities> {
        let text = pair.joined();
        let resp = self
            .client
            .http
            .post(self.client.url("classify"))
            .json(&TextReq { text: &text })
            .send()
            .await
            .context("stance classify request")?
            .error_for_status()
            .context("stance classify status")?;
        let body: ClassifyResp = resp.json().await.context("stance classify body")?;
        ClassProbabilities::from_labeled(body.scores.iter().map(|s| (s.label.as_str(), s.score)))
    }

    fn name(&self) -> &'static str {
        "http-stance"
    }
}

/// Remote single-axis regressor.
pub struct HttpAxisModel {
    client: ModelServerClient,
    axis: Axis,
}

#[async_trait]
impl AxisModel for HttpAxisModel {
    async fn score(&self, text: &str) -> Result<f64> {
        let resp = self
            .client
            .http
            .post(self.client.url(&format!("axes/{}/score", self.axis.name())))
            .json(&TextReq { text })
            .send()
            .await
            .with_context(|| format!("axis {} score request", self.axis))?
            .error_for_status()?;
        let body: AxisResp = resp.json().await?;
        Ok(body.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_loses_trailing_slash() {
        let cfg = ModelServerConfig {
            endpoint: "http://models.local:8700/".into(),
            timeout_secs: 5,
        };
        let c = ModelServerClient::new(&cfg).unwrap();
        assert_eq!(c.url("axes/economic"), "http://models.local:8700/axes/economic");
    }

    #[test]
    fn classify_response_parses_into_probabilities() {
        let raw = r#"{"scores":[{"label":"LABEL_0","score":0.1},
            {"label":"LABEL_1","score":0.2},{"label":"LABEL_2","score":0.7}]}"#;
        let body: ClassifyResp = serde_json::from_str(raw).unwrap();
        let p = ClassProbabilities::from_labeled(body.scores.iter().map(|s| (s.label.as_str(), s.score)))
            .unwrap();
        assert!((p.agree - 0.7).abs() < 1e-12);
        assert!((p.disagree - 0.1).abs() < 1e-12);
    }
}
