//! sse-relay: LLM chat completions relayed to browsers as Server-Sent Events.
//!
//! Upstream fragments arrive wherever the model's tokenizer cut them. The
//! relay re-cuts them into display lines, frames each line as an SSE event,
//! and stops reading upstream as soon as the browser goes away.
//!
//! - [`relay`]: Line splitting, SSE framing, and the relay loop
//! - [`upstream`]: OpenAI-compatible streaming client and a mock backend
//! - [`auth`]: JWKS bearer-token verification
//! - [`server`]: axum routes for the streaming endpoints

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod upstream;
