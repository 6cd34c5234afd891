//! LLM integration module.
//!
//! Provides an OpenAI-compatible client, the retry policy wrapped around
//! completion calls, and the prompts used for generation and judging.

mod client;
mod prompts;
mod retry;

pub use client::{CompletionBackend, LlmClient, LlmResponse, Message, Role, TokenUsage};
pub use prompts::Prompts;
pub use retry::{Attempt, RetryPolicy, RetryState, Sleeper, TokioSleeper};

#[cfg(test)]
pub(crate) use retry::tests::RecordingSleeper;
