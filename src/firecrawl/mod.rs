//! Firecrawl adapter: web search with scraped page markdown.

pub mod client;
pub mod types;

pub use client::FirecrawlClient;
