//! Upstream LLM completion backends.
//!
//! - [`traits`]: The backend trait, request and chunk types
//! - [`openai`]: OpenAI-compatible HTTP streaming client (Groq, OpenAI, ...)
//! - [`mock`]: Canned streaming backend for local runs and tests

pub mod mock;
pub mod openai;
pub mod traits;

pub use traits::{ChatMessage, Chunk, CompletionBackend, CompletionRequest, FragmentStream, UpstreamError};
