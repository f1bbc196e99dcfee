use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::AppError;
use crate::storage::types::message::{Message, MessageRole};
use crate::utils::contracts::{ChatCompletionChunk, ChatModel, Embedder};
use crate::utils::embedding::generate_embedding_with_params;

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage, AppError> {
    Ok(match message.role {
        MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into(),
        MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into(),
        MessageRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()?
            .into(),
        MessageRole::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(message.content.clone())
            .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
            .build()?
            .into(),
    })
}

#[async_trait]
impl Embedder for async_openai::Client<OpenAIConfig> {
    async fn embed(&self, input: &str, model: &str, dimensions: u32) -> Result<Vec<f32>, AppError> {
        generate_embedding_with_params(self, input, model, dimensions).await
    }
}

#[async_trait]
impl ChatModel for async_openai::Client<OpenAIConfig> {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String, AppError> {
        let request_messages = messages.iter().map(to_request_message).collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(request_messages)
            .build()?;
        let response = self.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMParsing("no completion choice returned".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(&self, model: &str, messages: &[Message]) -> Result<BoxStream<'static, Result<ChatCompletionChunk, AppError>>, AppError> {
        let request_messages = messages.iter().map(to_request_message).collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(request_messages)
            .stream(true)
            .build()?;
        let stream = self.chat().create_stream(request).await?;
        let mapped = stream.map(|chunk| {
            let chunk = chunk?;
            let choice = chunk.choices.into_iter().next();
            let delta = choice.as_ref().and_then(|c| c.delta.content.clone()).unwrap_or_default();
            let finished = choice.map(|c| c.finish_reason.is_some()).unwrap_or(false);
            Ok(ChatCompletionChunk { delta, finished })
        });
        Ok(Box::pin(mapped))
    }
}
