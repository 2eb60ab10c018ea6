// Range recommendations: deterministic heuristic plus an optional
// model-backed strategy that degrades to the heuristic on any failure

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RebalanceError;
use crate::types::{KpiSet, RangeRecommendation, RebalanceAction, RiskProfile};

/// Text-generation collaborator boundary. Implementations return free text;
/// the advisor extracts and validates the JSON itself.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RebalanceError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletionClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RebalanceError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt.to_string(),
                },
            ],
            temperature: 0.2,
        };

        let response: ChatResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RebalanceError::ParseError("completion response had no choices".into()))
    }
}

/// Output contract for the model-backed strategy. Unknown fields are
/// rejected outright: the model must never return ticks, sqrt prices, or
/// raw amounts.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelRecommendation {
    action: String,
    confidence: f64,
    reasoning: String,
    half_width_pct: f64,
    center_skew_pct: f64,
    expected_outcome: String,
}

const SYSTEM_PROMPT: &str = "You are a concentrated-liquidity range advisor. \
Reply with exactly one JSON object and nothing else. The object must contain \
only these fields: \"action\" (one of \"rebalance\", \"maintain\", \
\"withdraw\"), \"confidence\" (number between 0 and 1), \"reasoning\" \
(string), \"half_width_pct\" (number), \"center_skew_pct\" (number), \
\"expected_outcome\" (string). Never include ticks, sqrt prices, or token \
amounts in the reply.";

pub struct RecommendationAdvisor {
    model: Option<Arc<dyn CompletionClient>>,
    min_utilization_pct: f64,
    high_volatility_pct: f64,
}

impl RecommendationAdvisor {
    /// Heuristic-only advisor; fully functional with zero external
    /// dependencies.
    pub fn heuristic(min_utilization_pct: f64, high_volatility_pct: f64) -> Self {
        Self {
            model: None,
            min_utilization_pct,
            high_volatility_pct,
        }
    }

    /// Enables the model-backed strategy. The heuristic remains the
    /// fallback for every failure mode.
    pub fn with_model(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.model = Some(client);
        self
    }

    /// Decides whether to rebalance and proposes percentage-based range
    /// parameters. Never fails: any model-path error falls back to the
    /// heuristic transparently.
    pub async fn recommend(
        &self,
        kpis: &KpiSet,
        current_range: (i32, i32),
        risk_profile: RiskProfile,
    ) -> RangeRecommendation {
        if let Some(client) = &self.model {
            match self
                .model_recommend(client.as_ref(), kpis, current_range, risk_profile)
                .await
            {
                Ok(rec) => return rec,
                Err(e) => {
                    warn!("model advisor unavailable, using heuristic: {}", e);
                }
            }
        }
        self.heuristic_recommend(kpis, risk_profile)
    }

    fn heuristic_recommend(&self, kpis: &KpiSet, risk_profile: RiskProfile) -> RangeRecommendation {
        let volatility = kpis
            .volatility_token0_pct
            .max(kpis.volatility_token1_pct);
        let needs_rebalance =
            kpis.utilization_pct < self.min_utilization_pct || volatility > self.high_volatility_pct;

        let (action, confidence, reasoning) = if needs_rebalance {
            (
                RebalanceAction::Rebalance,
                0.7,
                format!(
                    "utilization {:.1}% below {:.1}% or volatility {:.2}% above {:.2}%",
                    kpis.utilization_pct,
                    self.min_utilization_pct,
                    volatility,
                    self.high_volatility_pct
                ),
            )
        } else {
            (
                RebalanceAction::Maintain,
                0.5,
                format!("utilization {:.1}% healthy", kpis.utilization_pct),
            )
        };

        RangeRecommendation {
            action,
            confidence,
            half_width_pct: risk_profile.default_half_width_pct(),
            center_skew_pct: 0.0,
            risk_profile,
            reasoning: Some(reasoning),
            expected_outcome: None,
        }
    }

    async fn model_recommend(
        &self,
        client: &dyn CompletionClient,
        kpis: &KpiSet,
        current_range: (i32, i32),
        risk_profile: RiskProfile,
    ) -> Result<RangeRecommendation, RebalanceError> {
        let (band_lo, band_hi) = risk_profile.half_width_band();
        let user_prompt = format!(
            "Risk profile: {} (half_width_pct should stay within {}%-{}%).\n\
             Current position range: ticks [{}, {}].\n\
             Pool KPIs: {}",
            risk_profile,
            band_lo,
            band_hi,
            current_range.0,
            current_range.1,
            serde_json::to_string(kpis)?
        );

        let text = client.complete(SYSTEM_PROMPT, &user_prompt).await?;
        let json = extract_json_object(&text).ok_or_else(|| {
            RebalanceError::ParseError("completion contained no JSON object".into())
        })?;
        let parsed: ModelRecommendation = serde_json::from_str(json)?;

        let action = match parsed.action.as_str() {
            "rebalance" => RebalanceAction::Rebalance,
            "maintain" => RebalanceAction::Maintain,
            "withdraw" => RebalanceAction::Withdraw,
            other => {
                return Err(RebalanceError::ParseError(format!(
                    "unknown action '{}'",
                    other
                )))
            }
        };
        if !(0.0..=1.0).contains(&parsed.confidence) {
            return Err(RebalanceError::ParseError(format!(
                "confidence {} outside [0, 1]",
                parsed.confidence
            )));
        }
        if !parsed.half_width_pct.is_finite() || !parsed.center_skew_pct.is_finite() {
            return Err(RebalanceError::ParseError(
                "non-finite range parameters".into(),
            ));
        }

        debug!(
            action = ?action,
            confidence = parsed.confidence,
            half_width = parsed.half_width_pct,
            "model recommendation accepted"
        );

        // The half-width is advisory; the planner re-validates it against
        // the policy bands before any range is built
        Ok(RangeRecommendation {
            action,
            confidence: parsed.confidence,
            half_width_pct: parsed.half_width_pct,
            center_skew_pct: parsed.center_skew_pct,
            risk_profile,
            reasoning: Some(parsed.reasoning),
            expected_outcome: Some(parsed.expected_outcome),
        })
    }
}

/// First top-level JSON object in `text`: from the first `{` to its
/// matching close brace, string literals and escapes respected.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticClient(String);

    #[async_trait]
    impl CompletionClient for StaticClient {
        async fn complete(&self, _: &str, _: &str) -> Result<String, RebalanceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl CompletionClient for FailingClient {
        async fn complete(&self, _: &str, _: &str) -> Result<String, RebalanceError> {
            Err(RebalanceError::UpstreamUnavailable("offline".into()))
        }
    }

    fn low_utilization_kpis() -> KpiSet {
        KpiSet {
            utilization_pct: 5.0,
            ..Default::default()
        }
    }

    fn healthy_kpis() -> KpiSet {
        KpiSet {
            utilization_pct: 60.0,
            volatility_token0_pct: 1.0,
            volatility_token1_pct: 0.5,
            ..Default::default()
        }
    }

    fn valid_model_json() -> String {
        r#"Based on the data, here is my advice:
        {"action": "rebalance", "confidence": 0.85,
         "reasoning": "price drifting above range",
         "half_width_pct": 7.5, "center_skew_pct": -1.0,
         "expected_outcome": "higher fee capture"}"#
            .to_string()
    }

    #[test]
    fn test_extract_json_object_handles_nesting_and_strings() {
        let text = r#"prefix {"a": {"b": "contains } brace"}, "c": 1} suffix"#;
        let json = extract_json_object(text).unwrap();
        assert_eq!(json, r#"{"a": {"b": "contains } brace"}, "c": 1}"#);

        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{unterminated").is_none());
    }

    #[tokio::test]
    async fn test_heuristic_rebalances_on_low_utilization() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0);
        let rec = advisor
            .recommend(&low_utilization_kpis(), (-600, 600), RiskProfile::Medium)
            .await;

        assert_eq!(rec.action, RebalanceAction::Rebalance);
        assert_eq!(rec.confidence, 0.7);
        let (lo, hi) = RiskProfile::Medium.half_width_band();
        assert!(rec.half_width_pct >= lo && rec.half_width_pct <= hi);
    }

    #[tokio::test]
    async fn test_heuristic_rebalances_on_high_volatility() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0);
        let kpis = KpiSet {
            utilization_pct: 80.0,
            volatility_token1_pct: 9.0,
            ..Default::default()
        };
        let rec = advisor.recommend(&kpis, (-600, 600), RiskProfile::Aggressive).await;

        assert_eq!(rec.action, RebalanceAction::Rebalance);
    }

    #[tokio::test]
    async fn test_heuristic_maintains_when_healthy() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0);
        let rec = advisor
            .recommend(&healthy_kpis(), (-600, 600), RiskProfile::Conservative)
            .await;

        assert_eq!(rec.action, RebalanceAction::Maintain);
        assert_eq!(rec.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_model_recommendation_is_used_when_valid() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0)
            .with_model(Arc::new(StaticClient(valid_model_json())));
        let rec = advisor
            .recommend(&healthy_kpis(), (-600, 600), RiskProfile::Medium)
            .await;

        assert_eq!(rec.action, RebalanceAction::Rebalance);
        assert_eq!(rec.confidence, 0.85);
        assert_eq!(rec.half_width_pct, 7.5);
        assert_eq!(rec.expected_outcome.as_deref(), Some("higher fee capture"));
    }

    #[tokio::test]
    async fn test_non_json_reply_falls_back_silently() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0)
            .with_model(Arc::new(StaticClient("I think you should rebalance.".into())));
        let rec = advisor
            .recommend(&healthy_kpis(), (-600, 600), RiskProfile::Medium)
            .await;

        // Heuristic result, same return type, no error surfaced
        assert_eq!(rec.action, RebalanceAction::Maintain);
        assert_eq!(rec.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_reply_with_ticks_is_rejected() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0).with_model(Arc::new(
            StaticClient(
                r#"{"action": "rebalance", "confidence": 0.9, "reasoning": "x",
                    "half_width_pct": 6.0, "center_skew_pct": 0.0,
                    "expected_outcome": "y", "lower_tick": -600}"#
                    .into(),
            ),
        ));
        let rec = advisor
            .recommend(&healthy_kpis(), (-600, 600), RiskProfile::Medium)
            .await;

        assert_eq!(rec.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_rejected() {
        let advisor = RecommendationAdvisor::heuristic(20.0, 5.0).with_model(Arc::new(
            StaticClient(
                r#"{"action": "maintain", "confidence": 1.5, "reasoning": "x",
                    "half_width_pct": 6.0, "center_skew_pct": 0.0,
                    "expected_outcome": "y"}"#
                    .into(),
            ),
        ));
        let rec = advisor
            .recommend(&low_utilization_kpis(), (-600, 600), RiskProfile::Medium)
            .await;

        assert_eq!(rec.action, RebalanceAction::Rebalance);
        assert_eq!(rec.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_unavailable_client_falls_back() {
        let advisor =
            RecommendationAdvisor::heuristic(20.0, 5.0).with_model(Arc::new(FailingClient));
        let rec = advisor
            .recommend(&healthy_kpis(), (-600, 600), RiskProfile::Medium)
            .await;

        assert_eq!(rec.action, RebalanceAction::Maintain);
    }
}
