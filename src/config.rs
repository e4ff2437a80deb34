//! Environment-driven configuration, read once at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub perplexity: PerplexityConfig,
    pub firecrawl: FirecrawlConfig,
    pub search: SearchConfig,
    pub processing: ProcessingConfig,
    pub workflow: WorkflowConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub planning_model: String,
    pub answer_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct PerplexityConfig {
    pub api_key: Option<String>,
    pub enabled: bool,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct FirecrawlConfig {
    pub api_key: Option<String>,
    pub enabled: bool,
    pub limit: u32,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Wall-clock bound for one query's provider fan-out.
    pub timeout: Duration,
    /// Return partial results instead of a timeout error when any provider answered.
    pub allow_partial: bool,
    /// Queries per concurrency window in batch search.
    pub batch_size: usize,
    /// Pause between batch windows.
    pub batch_delay: Duration,
    /// How long finished operations stay visible to status queries.
    pub retention: Duration,
    pub registry_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub enabled: bool,
    /// Dedup is quadratic; larger inputs are rejected.
    pub max_records: usize,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub max_sub_questions: usize,
    pub max_concurrent_searches: usize,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Characters per `message_chunk` event.
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PERPLEXITY_MODEL: &str = "sonar";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let config = Self {
            gemini: GeminiConfig {
                api_key: vars.string("GEMINI_API_KEY"),
                planning_model: vars
                    .string("GEMINI_PLANNING_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                answer_model: vars
                    .string("GEMINI_ANSWER_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                timeout: vars.millis("GEMINI_TIMEOUT_MS", 20_000)?,
                max_retries: vars.parse("GEMINI_MAX_RETRIES", 2)?,
            },
            perplexity: PerplexityConfig {
                api_key: vars.string("PERPLEXITY_API_KEY"),
                enabled: vars.flag("ENABLE_PERPLEXITY", true)?,
                model: vars
                    .string("PERPLEXITY_MODEL")
                    .unwrap_or_else(|| DEFAULT_PERPLEXITY_MODEL.to_string()),
                timeout: vars.millis("PERPLEXITY_TIMEOUT_MS", 20_000)?,
                max_retries: vars.parse("PERPLEXITY_MAX_RETRIES", 2)?,
            },
            firecrawl: FirecrawlConfig {
                api_key: vars.string("FIRECRAWL_API_KEY"),
                enabled: vars.flag("ENABLE_FIRECRAWL", true)?,
                limit: vars.parse("FIRECRAWL_LIMIT", 5)?,
                timeout: vars.millis("FIRECRAWL_TIMEOUT_MS", 20_000)?,
                max_retries: vars.parse("FIRECRAWL_MAX_RETRIES", 2)?,
            },
            search: SearchConfig {
                timeout: vars.millis("SEARCH_TIMEOUT_MS", 30_000)?,
                allow_partial: vars.flag("SEARCH_ALLOW_PARTIAL", true)?,
                batch_size: vars.parse("SEARCH_BATCH_SIZE", 3)?,
                batch_delay: vars.millis("SEARCH_BATCH_DELAY_MS", 1_000)?,
                retention: Duration::from_secs(vars.parse("SEARCH_RETENTION_SECS", 300)?),
                registry_capacity: vars.parse("SEARCH_REGISTRY_CAPACITY", 1_000)?,
            },
            processing: ProcessingConfig {
                enabled: vars.flag("ENABLE_RESULT_PROCESSING", true)?,
                max_records: vars.parse("PROCESSING_MAX_RECORDS", 500)?,
            },
            workflow: WorkflowConfig {
                max_sub_questions: vars.parse("WORKFLOW_MAX_SUB_QUESTIONS", 5)?,
                max_concurrent_searches: vars.parse("WORKFLOW_MAX_CONCURRENT", 3)?,
            },
            stream: StreamConfig {
                chunk_size: vars.parse("STREAM_CHUNK_SIZE", 24)?,
                chunk_delay: vars.millis("STREAM_CHUNK_DELAY_MS", 30)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("SEARCH_BATCH_SIZE", self.search.batch_size),
            ("SEARCH_REGISTRY_CAPACITY", self.search.registry_capacity),
            ("WORKFLOW_MAX_SUB_QUESTIONS", self.workflow.max_sub_questions),
            ("WORKFLOW_MAX_CONCURRENT", self.workflow.max_concurrent_searches),
            ("STREAM_CHUNK_SIZE", self.stream.chunk_size),
            ("FIRECRAWL_LIMIT", self.firecrawl.limit as usize),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Zero(key));
            }
        }
        if self.search.timeout.is_zero() {
            return Err(ConfigError::Zero("SEARCH_TIMEOUT_MS"));
        }
        Ok(())
    }
}

impl PerplexityConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

impl FirecrawlConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_millis)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        }
    }
}
