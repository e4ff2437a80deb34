//! Gemini adapter used for research planning and answer synthesis.

pub mod client;
mod extract;
pub mod types;

pub use client::GeminiClient;
