//! HTTP server relaying LLM completions as SSE.
//!
//! - [`routes`]: Router construction and shared state
//! - [`handlers`]: Route handlers and stream setup
//! - [`prompts`]: Prompt construction and the `Visit` request schema

pub mod handlers;
pub mod prompts;
pub mod routes;
