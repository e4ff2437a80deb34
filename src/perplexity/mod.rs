//! Perplexity adapter: a search LLM returning a cited free-text answer.

pub mod client;
pub mod types;

pub use client::PerplexityClient;
