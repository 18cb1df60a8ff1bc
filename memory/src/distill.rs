use crate::DynCompletion;
use crate::telemetry::EngineTelemetry;
use config::DistillationConfig;
use engram_core::types::{EpisodicFact, WorkingMemoryTurn};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFact {
    text: String,
    #[serde(default)]
    entity_tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DistillationResult {
    pub facts: Vec<EpisodicFact>,
}

impl DistillationResult {
    pub fn facts_created(&self) -> usize {
        self.facts.len()
    }
}

/// Turns a window of conversation into durable episodic facts via the
/// completion service.
///
/// The model is asked for a JSON array of facts; anything outside the first
/// `[` and last `]` of the response is ignored so prose-wrapped answers
/// still parse. Distillation is best-effort: completion or parse failures
/// yield an empty result and a warning, never an error.
pub struct Distiller {
    completion: DynCompletion,
    config: DistillationConfig,
    telemetry: Arc<EngineTelemetry>,
}

impl Distiller {
    pub fn new(
        completion: DynCompletion,
        config: DistillationConfig,
        telemetry: Arc<EngineTelemetry>,
    ) -> Self {
        Self {
            completion,
            config,
            telemetry,
        }
    }

    pub fn completion_handle(&self) -> DynCompletion {
        self.completion.clone()
    }

    pub async fn distill(
        &self,
        session_id: &str,
        turns: &[WorkingMemoryTurn],
    ) -> DistillationResult {
        if turns.is_empty() {
            return DistillationResult::default();
        }

        let prompt = self.build_prompt(turns);
        let response = match self.completion.complete(&prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(session_id, error = %err, "Distillation completion failed");
                self.telemetry.record_distillation_failure("completion");
                return DistillationResult::default();
            }
        };

        let raw_facts = match Self::parse_response(&response) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(session_id, error = %err, "Distillation response did not parse");
                self.telemetry.record_distillation_failure("parse");
                return DistillationResult::default();
            }
        };

        let facts: Vec<EpisodicFact> = raw_facts
            .into_iter()
            .filter(|raw| !raw.text.trim().is_empty())
            .take(self.config.max_facts_per_pass)
            .map(|raw| {
                EpisodicFact::new(
                    raw.text.trim().to_string(),
                    session_id.to_string(),
                    raw.entity_tags,
                    self.config.initial_salience,
                    self.config.fact_ttl_days,
                )
            })
            .collect();

        debug!(session_id, facts = facts.len(), "Distillation complete");
        self.telemetry.record_distillation(facts.len());
        DistillationResult { facts }
    }

    fn build_prompt(&self, turns: &[WorkingMemoryTurn]) -> String {
        let mut transcript = String::new();
        for turn in turns {
            transcript.push_str(&format!(
                "User: {}\nAssistant: {}\n",
                turn.user_message, turn.assistant_message
            ));
        }

        format!(
            r#"Extract durable facts from this conversation that would be useful to remember in future sessions.

Conversation:
{transcript}

Return ONLY a JSON array. Each element must have:
- "text": one self-contained factual statement
- "entityTags": entities the fact is about

Return at most {} facts. Skip small talk and transient details. Return [] if nothing is worth remembering."#,
            self.config.max_facts_per_pass
        )
    }

    fn parse_response(response: &str) -> Result<Vec<RawFact>, crate::BoxError> {
        let start = response
            .find('[')
            .ok_or("No JSON array found in response")?;
        let end = response
            .rfind(']')
            .filter(|end| *end > start)
            .ok_or("Unterminated JSON array in response")?;
        let raw = serde_json::from_str(&response[start..=end])?;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockCompletion;
    use engram_core::types::FactType;

    fn turns(n: u64) -> Vec<WorkingMemoryTurn> {
        (0..n)
            .map(|i| {
                WorkingMemoryTurn::new(
                    "s1".to_string(),
                    i,
                    format!("question {i}"),
                    format!("answer {i}"),
                )
            })
            .collect()
    }

    fn distiller(response: &str) -> Distiller {
        Distiller::new(
            Arc::new(MockCompletion::new(vec![response.to_string()])),
            DistillationConfig::default(),
            Arc::new(EngineTelemetry::new()),
        )
    }

    #[tokio::test]
    async fn test_distill_parses_fact_array() {
        let distiller = distiller(
            r#"[{"text": "the user works at acme", "entityTags": ["acme", "user"]},
                {"text": "deploys run on fridays", "entityTags": ["deploys"]}]"#,
        );

        let result = distiller.distill("s1", &turns(3)).await;
        assert_eq!(result.facts_created(), 2);
        assert_eq!(result.facts[0].text, "the user works at acme");
        assert_eq!(result.facts[0].entity_tags, vec!["acme", "user"]);
        assert_eq!(result.facts[0].session_id, "s1");
        assert_eq!(result.facts[0].fact_type, FactType::Distilled);
        assert!((result.facts[0].salience - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_distill_tolerates_prose_wrapping() {
        let distiller = distiller(
            r#"Here are the facts I extracted:
            [{"text": "the user prefers tabs", "entityTags": []}]
            Let me know if you need more."#,
        );

        let result = distiller.distill("s1", &turns(1)).await;
        assert_eq!(result.facts_created(), 1);
        assert_eq!(result.facts[0].text, "the user prefers tabs");
    }

    #[tokio::test]
    async fn test_distill_caps_facts_per_pass() {
        let many: Vec<String> = (0..30)
            .map(|i| format!(r#"{{"text": "fact number {i}", "entityTags": []}}"#))
            .collect();
        let distiller = distiller(&format!("[{}]", many.join(",")));

        let result = distiller.distill("s1", &turns(1)).await;
        assert_eq!(
            result.facts_created(),
            DistillationConfig::default().max_facts_per_pass
        );
    }

    #[tokio::test]
    async fn test_distill_skips_blank_facts() {
        let distiller = distiller(
            r#"[{"text": "   ", "entityTags": []}, {"text": "real fact", "entityTags": []}]"#,
        );
        let result = distiller.distill("s1", &turns(1)).await;
        assert_eq!(result.facts_created(), 1);
        assert_eq!(result.facts[0].text, "real fact");
    }

    #[tokio::test]
    async fn test_distill_failure_yields_empty() {
        let failing = Distiller::new(
            Arc::new(MockCompletion::failing()),
            DistillationConfig::default(),
            Arc::new(EngineTelemetry::new()),
        );
        let result = failing.distill("s1", &turns(2)).await;
        assert!(result.facts.is_empty());

        let garbled = distiller("I could not find any structured facts, sorry.");
        let result = garbled.distill("s1", &turns(2)).await;
        assert!(result.facts.is_empty());
    }

    #[tokio::test]
    async fn test_distill_empty_turns_skips_completion() {
        let distiller = Distiller::new(
            Arc::new(MockCompletion::failing()),
            DistillationConfig::default(),
            Arc::new(EngineTelemetry::new()),
        );
        let result = distiller.distill("s1", &[]).await;
        assert!(result.facts.is_empty());
    }
}
