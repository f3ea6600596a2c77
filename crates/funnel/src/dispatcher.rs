//! Routes one user message to one operation.
//!
//! ```text
//! ExtractMessage -> Shortlist -> RequestDecision -> Validate -> Invoke -> Package
//!                                               \-> (reply)  ------------/
//! ```
//!
//! The first two stages fail with [`DispatchError`]. Everything from Validate
//! on is folded into the returned [`Outcome`], so a bad model decision or a
//! failing operation never aborts the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use funnelconf::FunnelConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn, Span};
use uuid::Uuid;

use crate::chat::{ChatBackend, ChatDecision, ChatRequest};
use crate::error::{DispatchError, FailureKind, OperationFailure};
use crate::registry::OperationRegistry;
use crate::retriever::Retriever;
use crate::types::ChatMessage;

/// Dispatch call parameters.
///
/// Every field is required at dispatch time; they are optional here so a
/// missing one is reported as the matching [`DispatchError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,

    #[serde(default)]
    pub model: Option<String>,

    /// Shortlist size
    #[serde(default)]
    pub k: Option<usize>,
}

impl DispatchRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, k: usize) -> Self {
        Self {
            messages: Some(messages),
            model: Some(model.into()),
            k: Some(k),
        }
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    /// Structured failure from Validate or Invoke
    Error { error: FailureKind, message: String },

    /// Operation return value
    Success(Value),

    /// The model answered in plain text without choosing an operation
    Reply(String),
}

impl Outcome {
    fn failed(failure: OperationFailure) -> Self {
        Outcome::Error {
            error: failure.kind,
            message: failure.message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Error { error, .. } => Some(*error),
            _ => None,
        }
    }

    /// The operation's return value, if it ran successfully
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// Wall-clock time per stage, in milliseconds. Skipped stages are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub vector_search: Option<f64>,
    pub chat: Option<f64>,
    pub operation: Option<f64>,
    pub total: f64,
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub dispatch_id: Uuid,

    /// Chosen operation; `None` when the model replied in plain text
    pub operation_name: Option<String>,

    /// Validated arguments with defaults applied, or the raw payload if
    /// validation failed
    pub arguments: Option<Value>,

    pub outcome: Outcome,

    /// Shortlisted operation names, most relevant first
    pub candidates: Vec<String>,

    /// Other shortlisted operations the caller may offer instead
    pub suggestions: Vec<String>,

    pub timings: Timings,
}

/// Arguments as they arrived, before validation
enum RawArguments {
    Json(Value),
    Text(String),
}

impl RawArguments {
    fn parse(self) -> Result<Value, (Value, OperationFailure)> {
        match self {
            RawArguments::Json(value) => Ok(value),
            RawArguments::Text(text) if text.trim().is_empty() => Ok(Value::Null),
            RawArguments::Text(text) => serde_json::from_str(&text).map_err(|e| {
                let failure =
                    OperationFailure::validation(format!("Arguments are not valid JSON: {}", e));
                (Value::String(text), failure)
            }),
        }
    }
}

/// Validate + Invoke outcome for one operation
struct Execution {
    arguments: Option<Value>,
    outcome: Outcome,
    elapsed: Option<Duration>,
}

pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    retriever: Arc<dyn Retriever>,
    chat: Arc<dyn ChatBackend>,
    max_suggestions: usize,
    temperature: Option<f32>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<OperationRegistry>,
        retriever: Arc<dyn Retriever>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            registry,
            retriever,
            chat,
            max_suggestions: funnelconf::DispatchConfig::default().max_suggestions,
            temperature: None,
        }
    }

    /// Apply dispatch and model settings from config.
    pub fn configured(mut self, config: &FunnelConfig) -> Self {
        self.max_suggestions = config.dispatch.max_suggestions;
        self.temperature = config.openai.temperature;
        self
    }

    pub fn with_max_suggestions(mut self, max_suggestions: usize) -> Self {
        self.max_suggestions = max_suggestions;
        self
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Route the latest user message to an operation and run it.
    #[tracing::instrument(
        skip_all,
        fields(
            dispatch_id = tracing::field::Empty,
            model = tracing::field::Empty,
            k = tracing::field::Empty,
            candidates = tracing::field::Empty,
            operation = tracing::field::Empty,
        )
    )]
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        let started = Instant::now();
        let dispatch_id = Uuid::new_v4();
        let span = Span::current();
        span.record("dispatch_id", tracing::field::display(dispatch_id));

        // ExtractMessage
        let model = request
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or(DispatchError::NoModelProvided)?;
        let messages = request
            .messages
            .filter(|m| !m.is_empty())
            .ok_or(DispatchError::NoMessagesProvided)?;
        let query = latest_user_message(&messages)
            .ok_or(DispatchError::NoUserMessage)?
            .to_string();
        let k = request.k.ok_or(DispatchError::NoTopNProvided)?;
        span.record("model", model.as_str());
        span.record("k", k);

        // Shortlist
        let search_started = Instant::now();
        let functions = self
            .retriever
            .search_and_expand(&self.registry, &query, k)
            .await
            .map_err(DispatchError::Retriever)?;
        let vector_search = millis(search_started.elapsed());
        let candidates: Vec<String> = functions.iter().map(|f| f.name.clone()).collect();
        span.record("candidates", candidates.len());
        debug!(?candidates, "shortlisted operations");

        // RequestDecision
        let chat_started = Instant::now();
        let decision = self
            .chat
            .decide(ChatRequest {
                model,
                messages,
                functions,
                temperature: self.temperature,
            })
            .await
            .map_err(DispatchError::Chat)?;
        let chat = millis(chat_started.elapsed());

        let (operation_name, execution) = match decision {
            ChatDecision::Reply { content } => {
                info!("model replied without choosing an operation");
                let execution = Execution {
                    arguments: None,
                    outcome: Outcome::Reply(content),
                    elapsed: None,
                };
                (None, execution)
            }
            ChatDecision::FunctionCall { name, arguments } => {
                span.record("operation", name.as_str());
                info!(operation = %name, "model chose operation");
                let execution = self.execute(&name, RawArguments::Text(arguments)).await;
                (Some(name), execution)
            }
        };

        // Package
        let suggestions = self.suggestions(&candidates, operation_name.as_deref());
        Ok(DispatchResult {
            dispatch_id,
            operation_name,
            arguments: execution.arguments,
            outcome: execution.outcome,
            candidates,
            suggestions,
            timings: Timings {
                vector_search: Some(vector_search),
                chat: Some(chat),
                operation: execution.elapsed.map(millis),
                total: millis(started.elapsed()),
            },
        })
    }

    /// Run a named operation directly, skipping retrieval and chat.
    #[tracing::instrument(skip(self, arguments), fields(dispatch_id = tracing::field::Empty))]
    pub async fn run_operation(&self, name: &str, arguments: Value) -> DispatchResult {
        let started = Instant::now();
        let dispatch_id = Uuid::new_v4();
        Span::current().record("dispatch_id", tracing::field::display(dispatch_id));

        let execution = self.execute(name, RawArguments::Json(arguments)).await;
        DispatchResult {
            dispatch_id,
            operation_name: Some(name.to_string()),
            arguments: execution.arguments,
            outcome: execution.outcome,
            candidates: Vec::new(),
            suggestions: Vec::new(),
            timings: Timings {
                vector_search: None,
                chat: None,
                operation: execution.elapsed.map(millis),
                total: millis(started.elapsed()),
            },
        }
    }

    /// Validate + Invoke. Never fails; failures become the outcome.
    async fn execute(&self, name: &str, raw: RawArguments) -> Execution {
        let Some(descriptor) = self.registry.get(name) else {
            warn!(operation = %name, "model chose an unregistered operation");
            let arguments = raw.parse().unwrap_or_else(|(text, _)| text);
            return Execution {
                arguments: Some(arguments),
                outcome: Outcome::failed(OperationFailure::not_found(name)),
                elapsed: None,
            };
        };

        let payload = match raw.parse() {
            Ok(payload) => payload,
            Err((text, failure)) => {
                warn!(operation = %name, error = %failure.message, "malformed arguments");
                return Execution {
                    arguments: Some(text),
                    outcome: Outcome::failed(failure),
                    elapsed: None,
                };
            }
        };

        let validated = match descriptor.validate(payload.clone()) {
            Ok(validated) => validated,
            Err(failure) => {
                warn!(operation = %name, error = %failure.message, "argument validation failed");
                return Execution {
                    arguments: Some(payload),
                    outcome: Outcome::failed(failure),
                    elapsed: None,
                };
            }
        };
        let arguments = validated.canonical().clone();

        let invoke_started = Instant::now();
        let outcome = match descriptor.invoke(validated).await {
            Ok(value) => Outcome::Success(value),
            Err(failure) => {
                warn!(operation = %name, error = %failure.message, "operation failed");
                Outcome::failed(failure)
            }
        };

        Execution {
            arguments: Some(arguments),
            outcome,
            elapsed: Some(invoke_started.elapsed()),
        }
    }

    fn suggestions(&self, candidates: &[String], chosen: Option<&str>) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| Some(c.as_str()) != chosen)
            .take(self.max_suggestions)
            .cloned()
            .collect()
    }
}

/// Content of the most recent user message with text.
pub fn latest_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .filter(|m| m.is_user())
        .find_map(|m| m.content.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, OperationDescriptor};
    use crate::types::FunctionSchema;
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct GreetInput {
        /// Who to greet
        name: String,
    }

    struct Greet;

    #[async_trait]
    impl Operation for Greet {
        type Input = GreetInput;
        type Output = Value;

        fn name(&self) -> &str {
            "greet"
        }

        fn description(&self) -> &str {
            "Greet someone by name."
        }

        async fn call(&self, input: GreetInput) -> anyhow::Result<Value> {
            Ok(json!({"greeting": format!("Hello, {}!", input.name)}))
        }
    }

    struct Listed(Vec<String>);

    #[async_trait]
    impl Retriever for Listed {
        async fn index(&self, _registry: &OperationRegistry) -> anyhow::Result<()> {
            Ok(())
        }

        async fn search(&self, _query: &str, k: usize) -> anyhow::Result<Vec<String>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl Retriever for Failing {
        async fn index(&self, _registry: &OperationRegistry) -> anyhow::Result<()> {
            Ok(())
        }

        async fn search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("vector store offline")
        }
    }

    /// Returns a fixed decision and records what it was shown
    struct Scripted {
        decision: ChatDecision,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(decision: ChatDecision) -> Arc<Self> {
            Arc::new(Self {
                decision,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn call(name: &str, arguments: &str) -> Arc<Self> {
            Self::new(ChatDecision::FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            })
        }

        fn shown_functions(&self) -> Vec<FunctionSchema> {
            self.seen.lock().unwrap()[0].functions.clone()
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn decide(&self, request: ChatRequest) -> anyhow::Result<ChatDecision> {
            self.seen.lock().unwrap().push(request);
            Ok(self.decision.clone())
        }
    }

    fn registry() -> Arc<OperationRegistry> {
        Arc::new(
            OperationRegistry::from_operations(vec![OperationDescriptor::new(Greet).unwrap()])
                .unwrap(),
        )
    }

    fn dispatcher(candidates: &[&str], chat: Arc<Scripted>) -> Dispatcher {
        let names = candidates.iter().map(|s| s.to_string()).collect();
        Dispatcher::new(registry(), Arc::new(Listed(names)), chat)
    }

    fn request(k: usize) -> DispatchRequest {
        DispatchRequest::new(
            "gpt-test",
            vec![
                ChatMessage::system("Be brief."),
                ChatMessage::user("Say hi to Ada"),
            ],
            k,
        )
    }

    #[test]
    fn test_latest_user_message_scans_backwards() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("second"),
            ChatMessage::assistant("done"),
        ];
        assert_eq!(latest_user_message(&messages), Some("second"));
        assert_eq!(latest_user_message(&messages[1..2]), None);
    }

    #[tokio::test]
    async fn test_preconditions_in_order() {
        let d = dispatcher(&["greet"], Scripted::call("greet", "{}"));

        let err = d.dispatch(DispatchRequest::default()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoModelProvided));

        let err = d
            .dispatch(DispatchRequest {
                model: Some("gpt-test".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoMessagesProvided));

        let err = d
            .dispatch(DispatchRequest {
                model: Some("gpt-test".into()),
                messages: Some(Vec::new()),
                k: Some(3),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoMessagesProvided));

        let err = d
            .dispatch(DispatchRequest {
                model: Some("gpt-test".into()),
                messages: Some(vec![ChatMessage::system("only system")]),
                k: Some(3),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoUserMessage));

        let err = d
            .dispatch(DispatchRequest {
                k: None,
                ..request(1)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoTopNProvided));
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let chat = Scripted::call("greet", r#"{"name": "Ada"}"#);
        let d = dispatcher(&["greet"], chat.clone());

        let result = d.dispatch(request(3)).await.unwrap();
        assert_eq!(result.operation_name.as_deref(), Some("greet"));
        assert_eq!(result.arguments, Some(json!({"name": "Ada"})));
        assert_eq!(result.outcome, Outcome::Success(json!({"greeting": "Hello, Ada!"})));
        assert_eq!(result.candidates, vec!["greet".to_string()]);
        assert!(result.suggestions.is_empty());
        assert!(result.timings.operation.is_some());

        let seen = chat.seen.lock().unwrap();
        assert_eq!(seen[0].model, "gpt-test");
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].functions[0].name, "greet");
    }

    #[tokio::test]
    async fn test_reply_passes_through() {
        let chat = Scripted::new(ChatDecision::Reply {
            content: "Hi Ada!".to_string(),
        });
        let d = dispatcher(&["greet"], chat);

        let result = d.dispatch(request(3)).await.unwrap();
        assert_eq!(result.operation_name, None);
        assert_eq!(result.arguments, None);
        assert_eq!(result.outcome, Outcome::Reply("Hi Ada!".to_string()));
        assert_eq!(result.suggestions, vec!["greet".to_string()]);
        assert_eq!(result.timings.operation, None);
    }

    #[tokio::test]
    async fn test_unknown_operation_is_outcome() {
        let d = dispatcher(&["greet"], Scripted::call("teleport", r#"{"to": "Mars"}"#));

        let result = d.dispatch(request(3)).await.unwrap();
        assert_eq!(result.operation_name.as_deref(), Some("teleport"));
        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::OperationNotFound));
        assert_eq!(result.arguments, Some(json!({"to": "Mars"})));
        assert_eq!(result.timings.operation, None);
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_validation_errors() {
        let d = dispatcher(&["greet"], Scripted::call("greet", "{name: Ada"));

        let result = d.dispatch(request(3)).await.unwrap();
        assert_eq!(
            result.outcome.failure_kind(),
            Some(FailureKind::ArgumentValidationError)
        );
        assert_eq!(result.arguments, Some(json!("{name: Ada")));
    }

    #[tokio::test]
    async fn test_missing_field_is_validation_error() {
        let d = dispatcher(&["greet"], Scripted::call("greet", "{}"));

        let result = d.dispatch(request(3)).await.unwrap();
        assert_eq!(
            result.outcome.failure_kind(),
            Some(FailureKind::ArgumentValidationError)
        );
    }

    #[tokio::test]
    async fn test_empty_shortlist_reaches_chat() {
        let chat = Scripted::new(ChatDecision::Reply {
            content: "I can't help with that.".to_string(),
        });
        let d = dispatcher(&[], chat.clone());

        let result = d.dispatch(request(0)).await.unwrap();
        assert!(result.candidates.is_empty());
        assert!(chat.shown_functions().is_empty());
    }

    #[tokio::test]
    async fn test_retriever_failure_is_dispatch_error() {
        let d = Dispatcher::new(
            registry(),
            Arc::new(Failing),
            Scripted::call("greet", "{}"),
        );
        let err = d.dispatch(request(3)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Retriever(_)));
        assert!(err.to_string().contains("vector store offline"));
    }

    #[tokio::test]
    async fn test_suggestions_exclude_choice_and_are_capped() {
        let chat = Scripted::call("greet", r#"{"name": "Ada"}"#);
        let names = ["a", "greet", "b", "c"].iter().map(|s| s.to_string()).collect();
        let d = Dispatcher::new(registry(), Arc::new(Listed(names)), chat).with_max_suggestions(2);

        // Names missing from the registry are dropped before the chat stage
        let result = d.dispatch(request(4)).await.unwrap();
        assert_eq!(result.candidates, vec!["greet".to_string()]);
        assert!(result.suggestions.is_empty());

        let suggestions = d.suggestions(
            &["a".to_string(), "greet".to_string(), "b".to_string(), "c".to_string()],
            Some("greet"),
        );
        assert_eq!(suggestions, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_run_operation_directly() {
        let d = dispatcher(&[], Scripted::call("unused", "{}"));

        let result = d.run_operation("greet", json!({"name": "Grace"})).await;
        assert_eq!(result.outcome.value(), Some(&json!({"greeting": "Hello, Grace!"})));
        assert!(result.timings.chat.is_none());

        let result = d.run_operation("nope", json!({})).await;
        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::OperationNotFound));
    }

    #[test]
    fn test_outcome_serialization() {
        let error = Outcome::Error {
            error: FailureKind::ArgumentValidationError,
            message: "bad".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"error": "ArgumentValidationError", "message": "bad"})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Success(json!({"x": 1}))).unwrap(),
            json!({"x": 1})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Reply("hi".into())).unwrap(),
            json!("hi")
        );
    }

    #[tokio::test]
    async fn test_result_serializes_camel_case() {
        let d = dispatcher(&["greet"], Scripted::call("greet", r#"{"name": "Ada"}"#));
        let result = d.dispatch(request(1)).await.unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["operationName"], "greet");
        assert_eq!(value["outcome"]["greeting"], "Hello, Ada!");
        assert!(value["timings"]["vectorSearch"].is_number());
        assert!(value["dispatchId"].is_string());
    }
}
