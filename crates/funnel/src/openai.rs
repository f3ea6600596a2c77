//! OpenAI-compatible chat and embeddings backend.

use std::time::Duration;

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestFunctionMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
    CreateEmbeddingRequestArgs, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use funnelconf::OpenAiConfig;
use tracing::debug;

use crate::chat::{ChatBackend, ChatDecision, ChatRequest};
use crate::retriever::Embedder;
use crate::types::{ChatMessage, FunctionSchema, Role};

/// Chat completion and embeddings against one OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    embeddings_model: String,
}

impl OpenAiBackend {
    pub fn from_config(config: &OpenAiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let mut openai = OpenAIConfig::new().with_api_base(config.base_url.trim_end_matches('/'));
        if let Some(api_key) = &config.api_key {
            openai = openai.with_api_key(api_key);
        }

        Ok(Self {
            client: Client::with_config(openai).with_http_client(http),
            embeddings_model: config.embeddings_model.clone(),
        })
    }

    pub fn embeddings_model(&self) -> &str {
        &self.embeddings_model
    }

    fn convert_messages(
        messages: &[ChatMessage],
    ) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
        messages.iter().map(Self::convert_message).collect()
    }

    fn convert_message(message: &ChatMessage) -> anyhow::Result<ChatCompletionRequestMessage> {
        let content = message.content.clone().unwrap_or_default();
        let converted = match message.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::User => {
                let mut args = ChatCompletionRequestUserMessageArgs::default();
                args.content(content);
                if let Some(name) = &message.name {
                    args.name(name.clone());
                }
                args.build()?.into()
            }
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(content)
                .build()?
                .into(),
            Role::Tool => {
                let tool_call_id = message
                    .name
                    .clone()
                    .context("Tool message is missing its tool call id")?;
                ChatCompletionRequestToolMessageArgs::default()
                    .content(content)
                    .tool_call_id(tool_call_id)
                    .build()?
                    .into()
            }
            Role::Function => {
                let name = message
                    .name
                    .clone()
                    .context("Function message is missing its function name")?;
                #[allow(deprecated)]
                let function = ChatCompletionRequestFunctionMessageArgs::default()
                    .content(content)
                    .name(name)
                    .build()?;
                function.into()
            }
        };
        Ok(converted)
    }

    fn convert_tools(functions: &[FunctionSchema]) -> anyhow::Result<Vec<ChatCompletionTool>> {
        functions
            .iter()
            .map(|f| {
                Ok(ChatCompletionTool {
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionObject {
                        name: f.name.clone(),
                        description: Some(f.description.clone()),
                        parameters: Some(serde_json::to_value(&f.parameters)?),
                        strict: None,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    #[tracing::instrument(skip_all, fields(model = %request.model, functions = request.functions.len()))]
    async fn decide(&self, request: ChatRequest) -> anyhow::Result<ChatDecision> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(request.model.clone())
            .messages(Self::convert_messages(&request.messages)?);
        // The API rejects an empty tools array
        if !request.functions.is_empty() {
            args.tools(Self::convert_tools(&request.functions)?);
        }
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }

        let response = self
            .client
            .chat()
            .create(args.build()?)
            .await
            .context("Chat completion request failed")?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .context("Chat completion returned no choices")?;
        let message = choice.message;

        if let Some(call) = message.tool_calls.and_then(|calls| calls.into_iter().next()) {
            debug!(operation = %call.function.name, "model requested tool call");
            return Ok(ChatDecision::FunctionCall {
                name: call.function.name,
                arguments: call.function.arguments,
            });
        }

        #[allow(deprecated)]
        let legacy_call = message.function_call;
        if let Some(call) = legacy_call {
            debug!(operation = %call.name, "model requested legacy function call");
            return Ok(ChatDecision::FunctionCall {
                name: call.name,
                arguments: call.arguments,
            });
        }

        Ok(ChatDecision::Reply {
            content: message.content.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiBackend {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .context("Embeddings response was empty")
    }

    #[tracing::instrument(skip_all, fields(model = %self.embeddings_model, count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.embeddings_model.clone())
            .input(texts.to_vec())
            .build()?;
        let mut response = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("Embeddings request failed")?;

        if response.data.len() != texts.len() {
            anyhow::bail!(
                "Embeddings response has {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            );
        }
        response.data.sort_by_key(|e| e.index);
        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }
}
