use crate::messages::{ChatMessage, Role};
use anyhow::{Context, Result, bail};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

/// A stream of text fragments from the agent, in generation order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A generic text-generation agent.
///
/// Every component that needs generated text (classifiers and the
/// conversation controller) talks to the model only through this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageAgent: Send + Sync {
    /// Sends the ordered messages and returns the complete reply text.
    ///
    /// `max_output_tokens`, when given, must be positive.
    async fn ask(&self, messages: Vec<ChatMessage>, max_output_tokens: Option<u32>)
    -> Result<String>;

    /// Streaming variant of [`ask`](Self::ask). Concatenating the fragments
    /// yields the same text `ask` would have returned.
    async fn ask_stream(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: Option<u32>,
    ) -> Result<TextStream>;
}

/// Rejects a supplied output budget of zero.
pub fn check_output_budget(max_output_tokens: Option<u32>) -> Result<()> {
    if max_output_tokens == Some(0) {
        bail!("max_output_tokens must be positive when supplied");
    }
    Ok(())
}

/// An implementation of `LanguageAgent` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gpt-4o-mini").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: Option<u32>,
        streaming: bool,
    ) -> Result<CreateChatCompletionRequest> {
        check_output_budget(max_output_tokens)?;
        let messages = messages
            .into_iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if let Some(limit) = max_output_tokens {
            args.max_completion_tokens(limit);
        }
        if streaming {
            args.stream(true);
        }
        Ok(args.build()?)
    }
}

fn to_request_message(message: ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let converted = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content)
            .build()?
            .into(),
    };
    Ok(converted)
}

#[async_trait]
impl LanguageAgent for OpenAICompatibleClient {
    async fn ask(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: Option<u32>,
    ) -> Result<String> {
        let request = self.build_request(messages, max_output_tokens, false)?;
        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;
        Ok(content)
    }

    async fn ask_stream(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: Option<u32>,
    ) -> Result<TextStream> {
        let request = self.build_request(messages, max_output_tokens, true)?;
        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    if content.is_empty() {
                        None
                    } else {
                        Some(Ok(content))
                    }
                }
                Err(e) => Some(Err(e.into())),
            }
        })))
    }
}

/// A `LanguageAgent` that replays scripted replies in order.
///
/// Useful for offline runs and tests: every call, streaming or not, consumes
/// the next reply. Running out of replies is an error, as is a zero output
/// budget. Every received prompt is recorded for later inspection.
#[derive(Default)]
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<String>>,
    received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt received so far, oldest first.
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of scripted replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn next_reply(&self, messages: Vec<ChatMessage>, max_output_tokens: Option<u32>) -> Result<String> {
        check_output_budget(max_output_tokens)?;
        if let Ok(mut received) = self.received.lock() {
            received.push(messages);
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted reply queue poisoned"))?;
        replies.pop_front().context("Scripted agent has no replies left")
    }
}

#[async_trait]
impl LanguageAgent for ScriptedAgent {
    async fn ask(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: Option<u32>,
    ) -> Result<String> {
        self.next_reply(messages, max_output_tokens)
    }

    async fn ask_stream(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: Option<u32>,
    ) -> Result<TextStream> {
        let reply = self.next_reply(messages, max_output_tokens)?;
        Ok(Box::pin(stream::iter(
            split_fragments(&reply).into_iter().map(Ok),
        )))
    }
}

/// Splits text into word-sized fragments whose concatenation is the input.
fn split_fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}
