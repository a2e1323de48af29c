//! Turns scanned form fields and a user instruction into a candidate plan.
//!
//! One model call per run. The reply is untrusted: the JSON payload is
//! pulled out of whatever text surrounds it, and the result still has to go
//! through [`crate::sanitize`] before it may reach a page.

pub mod extract;
pub mod model;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::protocol::FieldDescriptor;
use crate::store::Retriever;

pub use extract::{extract_json, extract_json_span};
pub use model::{LanguageModel, ModelError};

/// Outcome of the planning stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanResult {
    /// Parsed JSON candidate, not yet sanitized.
    Planned(Value),
    /// The model answered but nothing usable could be extracted.
    Empty,
    /// The model could not be reached or refused the request.
    Failed(String),
}

/// The planning seam the coordinator depends on.
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn generate(&self, fields: &[FieldDescriptor], instruction: &str) -> PlanResult;
}

pub struct PlanGenerator {
    model: Arc<dyn LanguageModel>,
    retriever: Option<Arc<dyn Retriever>>,
    primary_context: String,
    top_k: usize,
}

impl PlanGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retriever: None,
            primary_context: String::new(),
            top_k: 2,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some(retriever);
        self.top_k = top_k;
        self
    }

    pub fn with_primary_context(mut self, context: impl Into<String>) -> Self {
        self.primary_context = context.into();
        self
    }

    /// Attach retrieved snippets to every field. Retrieval failures degrade
    /// to the bare field list.
    fn fields_with_context(&self, fields: &[FieldDescriptor], instruction: &str) -> Value {
        let Some(retriever) = &self.retriever else {
            return Value::Array(fields.to_vec());
        };

        let queries: Vec<String> = fields
            .iter()
            .map(|f| prompt::field_query(f, instruction))
            .collect();
        match retriever.retrieve(&queries, self.top_k) {
            Ok(hits) => Value::Array(
                fields
                    .iter()
                    .zip(hits)
                    .map(|(field, context)| json!({"field": field, "context": context}))
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, planning without personal data");
                Value::Array(fields.to_vec())
            }
        }
    }

    pub fn build_prompt(&self, fields: &[FieldDescriptor], instruction: &str) -> String {
        let fields = self.fields_with_context(fields, instruction);
        let html_fields =
            serde_json::to_string_pretty(&fields).unwrap_or_else(|_| fields.to_string());
        prompt::build_prompt(&self.primary_context, instruction, &html_fields)
    }
}

#[async_trait]
impl PlanSource for PlanGenerator {
    async fn generate(&self, fields: &[FieldDescriptor], instruction: &str) -> PlanResult {
        let prompt = self.build_prompt(fields, instruction);
        tracing::debug!(fields = fields.len(), prompt_len = prompt.len(), "asking model for a plan");

        let raw = match self.model.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "model call failed");
                return PlanResult::Failed(e.to_string());
            }
        };

        match extract_json(&raw) {
            Some(plan) => {
                tracing::info!(
                    steps = plan.as_array().map(Vec::len).unwrap_or(0),
                    "model returned a candidate plan"
                );
                PlanResult::Planned(plan)
            }
            None => {
                tracing::warn!(raw = %raw, "no usable JSON in model response");
                PlanResult::Empty
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(ModelError::MissingText)
        }
    }

    struct FixedRetriever(Vec<String>);

    impl Retriever for FixedRetriever {
        fn retrieve(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<String>>, StoreError> {
            Ok(queries
                .iter()
                .map(|_| self.0.iter().take(top_k).cloned().collect())
                .collect())
        }
    }

    struct BrokenRetriever;

    impl Retriever for BrokenRetriever {
        fn retrieve(&self, _: &[String], _: usize) -> Result<Vec<Vec<String>>, StoreError> {
            Err(StoreError::NotFound("index".into()))
        }
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![json!("<input id=\"email\" type=\"email\">")]
    }

    #[tokio::test]
    async fn chatty_reply_yields_candidate() {
        let model = ScriptedModel::replying(
            "Here is the plan:\n```json\n[{\"selector\":\"#email\",\"action_type\":\"FILL_TEXT\",\"value\":\"a@b.c\"}]\n```",
        );
        let generator = PlanGenerator::new(model.clone()).with_primary_context("- Email: a@b.c");

        let result = generator.generate(&fields(), "").await;
        assert_eq!(
            result,
            PlanResult::Planned(json!([
                {"selector": "#email", "action_type": "FILL_TEXT", "value": "a@b.c"}
            ]))
        );
        let prompt = model.last_prompt();
        assert!(prompt.contains(prompt::DEFAULT_INSTRUCTION));
        assert!(prompt.contains("- Email: a@b.c"));
        assert!(prompt.contains("id=\\\"email\\\""));
    }

    #[tokio::test]
    async fn unparsable_reply_is_empty() {
        let generator = PlanGenerator::new(ScriptedModel::replying("I can't help with that."));
        assert_eq!(generator.generate(&fields(), "x").await, PlanResult::Empty);

        let generator = PlanGenerator::new(ScriptedModel::replying("[{\"selector\": }]"));
        assert_eq!(generator.generate(&fields(), "x").await, PlanResult::Empty);
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let generator = PlanGenerator::new(ScriptedModel::failing("connection reset"));
        match generator.generate(&fields(), "").await {
            PlanResult::Failed(reason) => assert!(reason.contains("connection reset")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn retrieved_context_is_attached_per_field() {
        let model = ScriptedModel::replying("[]");
        let retriever = Arc::new(FixedRetriever(vec![
            "Field: Email | Value: work@corp.com | Description: Work".into(),
            "Field: Email | Value: me@home.net | Description: Personal".into(),
            "Field: Phone | Value: 1 | Description: -".into(),
        ]));
        let generator = PlanGenerator::new(model.clone()).with_retriever(retriever, 2);

        assert_eq!(
            generator.generate(&fields(), "use my work email").await,
            PlanResult::Planned(json!([]))
        );
        let prompt = model.last_prompt();
        assert!(prompt.contains("\"context\""));
        assert!(prompt.contains("work@corp.com"));
        assert!(prompt.contains("me@home.net"));
        assert!(!prompt.contains("Field: Phone"));
        assert!(prompt.contains("use my work email"));
    }

    #[tokio::test]
    async fn retrieval_failure_falls_back_to_bare_fields() {
        let model = ScriptedModel::replying("[]");
        let generator = PlanGenerator::new(model.clone()).with_retriever(Arc::new(BrokenRetriever), 2);

        generator.generate(&fields(), "").await;
        let prompt = model.last_prompt();
        assert!(!prompt.contains("\"context\""));
        assert!(prompt.contains("id=\\\"email\\\""));
    }
}
