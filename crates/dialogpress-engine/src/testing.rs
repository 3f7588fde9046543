use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use dialogpress_core::error::Result;
use dialogpress_core::types::PromptMessage;

use crate::invoke::{estimate_prompt_tokens, Completion, InvokeParams, LlmClient};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<PromptMessage>,
    pub params: InvokeParams,
}

/// In-memory collaborator: replays queued replies, then answers every prompt
/// with a fixed reply whose input tokens are the prompt estimate.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<Completion>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, text: &str, output_tokens: u64) {
        self.script.lock().unwrap().push_back(Ok(Completion {
            text: text.to_string(),
            input_tokens: 0,
            output_tokens,
            elapsed_ms: 0,
        }));
    }

    pub fn push_error(&self, err: dialogpress_core::EngineError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn invoke(&self, messages: &[PromptMessage], params: &InvokeParams) -> Result<Completion> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            params: params.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let input_tokens = estimate_prompt_tokens(messages);
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(mut completion)) => {
                completion.input_tokens = input_tokens;
                Ok(completion)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Completion {
                text: "Noted.".to_string(),
                input_tokens,
                output_tokens: 5,
                elapsed_ms: 0,
            }),
        }
    }
}
