use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::messages::{Message, ModerationResult, Verdict};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned status {0}")]
    Upstream(u16),
}

/// Which tier produced a result. `Heuristic` marks a degraded verdict that
/// the UI should visually distinguish from a model-backed one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisSource {
    Primary,
    Fallback,
    Heuristic,
}

#[derive(Clone, Debug)]
pub struct Analyzed<T> {
    pub value: T,
    pub source: AnalysisSource,
}

impl<T> Analyzed<T> {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.source == AnalysisSource::Heuristic
    }
}

/// Wire shape of `POST /api/factcheck`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub claim: String,
    pub verdict: Verdict,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
}

/// Wire shape of `POST /api/summarize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    pub key_points: Vec<String>,
    pub participants: u32,
    pub duration_minutes: u32,
}

/// Client for the moderation and fact-check services.
///
/// `moderate` and `fact_check` degrade through three tiers (primary
/// endpoint, workflow webhook, local heuristic) and therefore always
/// resolve. `summarize` has no fallback tier; its errors propagate.
pub struct AnalysisClient {
    http: reqwest::Client,
    config: AnalysisConfig,
}

impl AnalysisClient {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        Ok(AnalysisClient { http, config })
    }

    pub async fn moderate(&self, content: &str) -> Analyzed<ModerationResult> {
        let url = format!("{}/api/moderate", self.config.base_url.trim_end_matches('/'));
        match self.post_json(&url, &json!({ "content": content })).await {
            Ok(value) => Analyzed {
                value,
                source: AnalysisSource::Primary,
            },
            Err(e) => {
                warn!("moderation primary failed ({e}), trying workflow fallback");
                self.moderate_fallback(content).await
            }
        }
    }

    async fn moderate_fallback(&self, content: &str) -> Analyzed<ModerationResult> {
        let payload = json!({
            "content": content,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match self
            .post_json(&self.config.moderation_webhook_url, &payload)
            .await
        {
            Ok(value) => Analyzed {
                value,
                source: AnalysisSource::Fallback,
            },
            Err(e) => {
                warn!("moderation fallback failed ({e}), degrading to local heuristic");
                Analyzed {
                    value: self.moderation_heuristic(content),
                    source: AnalysisSource::Heuristic,
                }
            }
        }
    }

    fn moderation_heuristic(&self, content: &str) -> ModerationResult {
        let lowered = content.to_lowercase();
        let is_toxic = self
            .config
            .denylist
            .iter()
            .any(|term| lowered.contains(&term.to_lowercase()));
        ModerationResult {
            is_toxic,
            confidence: 0.5,
            categories: Vec::new(),
            message: "Moderation service temporarily unavailable".to_string(),
        }
    }

    pub async fn fact_check(&self, claim: &str) -> Analyzed<FactCheckResult> {
        let url = format!("{}/api/factcheck", self.config.base_url.trim_end_matches('/'));
        match self.post_json(&url, &json!({ "claim": claim })).await {
            Ok(value) => Analyzed {
                value,
                source: AnalysisSource::Primary,
            },
            Err(e) => {
                warn!("fact-check primary failed ({e}), trying workflow fallback");
                self.fact_check_fallback(claim).await
            }
        }
    }

    async fn fact_check_fallback(&self, claim: &str) -> Analyzed<FactCheckResult> {
        let payload = json!({
            "claim": claim,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match self
            .post_json(&self.config.factcheck_webhook_url, &payload)
            .await
        {
            Ok(value) => Analyzed {
                value,
                source: AnalysisSource::Fallback,
            },
            Err(e) => {
                warn!("fact-check fallback failed ({e}), degrading to local heuristic");
                Analyzed {
                    value: fact_check_heuristic(claim),
                    source: AnalysisSource::Heuristic,
                }
            }
        }
    }

    /// Debate summarization. No fallback tier; errors propagate.
    pub async fn summarize(
        &self,
        debate_id: &str,
        messages: &[Message],
    ) -> Result<SummaryResult, AnalysisError> {
        let url = format!("{}/api/summarize", self.config.base_url.trim_end_matches('/'));
        let payload = json!({
            "debate_id": debate_id,
            "messages": messages,
        });
        self.post_json(&url, &payload).await
    }

    /// Proactive availability probe; never gates analysis calls.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn post_json<T>(&self, url: &str, body: &serde_json::Value) -> Result<T, AnalysisError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Upstream(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))
    }
}

/// Terminal fact-check fallback: an honest "we could not verify this".
fn fact_check_heuristic(claim: &str) -> FactCheckResult {
    FactCheckResult {
        claim: claim.to_string(),
        verdict: Verdict::Unverified,
        sources: Vec::new(),
        confidence: 0.0,
        explanation: "Fact-checking service temporarily unavailable".to_string(),
    }
}
