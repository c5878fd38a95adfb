use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use common::{error::AppError, storage::types::job::JobInput, utils::config::AppConfig};

pub type OpenAIClientType = async_openai::Client<async_openai::config::OpenAIConfig>;

const SYSTEM_MESSAGE: &str =
    "You are a helpful assistant. Answer the user's request directly and completely.";

/// The long-running operation a job stands for.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, input: &JobInput) -> Result<String, AppError>;
}

/// Sends the job prompt to an OpenAI-compatible chat completion endpoint.
pub struct OpenAiInvoker {
    client: Arc<OpenAIClientType>,
    model: String,
}

impl OpenAiInvoker {
    pub fn new(client: Arc<OpenAIClientType>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let client = async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        );
        Self::new(Arc::new(client), config.model.clone())
    }

    fn build_request(&self, input: &JobInput) -> Result<CreateChatCompletionRequest, AppError> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessage::from(SYSTEM_MESSAGE).into()];

        if let Some(context) = input.context.as_deref() {
            messages.push(ChatCompletionRequestUserMessage::from(format!("Context:\n{context}")).into());
        }
        messages.push(ChatCompletionRequestUserMessage::from(input.prompt.clone()).into());

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;

        Ok(request)
    }
}

#[async_trait]
impl Invoker for OpenAiInvoker {
    async fn invoke(&self, input: &JobInput) -> Result<String, AppError> {
        let request = self.build_request(input)?;
        let response = self.client.chat().create(request).await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Processing("The model returned an empty response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_context_and_prompt() {
        let invoker = OpenAiInvoker::from_config(&AppConfig::for_tests());
        let request = invoker
            .build_request(&JobInput::new("Explain leases", Some("for a queue".into())))
            .expect("request");

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 3);
    }

    #[test]
    fn test_request_without_context() {
        let invoker = OpenAiInvoker::from_config(&AppConfig::for_tests());
        let request = invoker
            .build_request(&JobInput::new("Explain leases", None))
            .expect("request");

        assert_eq!(request.messages.len(), 2);
    }
}
