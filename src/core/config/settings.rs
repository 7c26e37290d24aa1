//! Runtime settings, resolved once at startup.
//!
//! Values come from environment variables (`INSIGHT_*`), optionally seeded
//! from a TOML file at `<data_dir>/config.toml`. Environment always wins.

use std::env;
use std::fs;

use serde::Deserialize;
use serde_json::{json, Value};

use super::paths::AppPaths;

/// Everything the service reads from the environment besides the required
/// model API key.
const OPTIONAL_ENV_KEYS: &[&str] = &[
    "INSIGHT_SPEECH_API_KEY",
    "INSIGHT_BIND_ADDR",
    "INSIGHT_CHAT_MODEL",
    "INSIGHT_EMBEDDING_MODEL",
    "INSIGHT_DATA_DIR",
    "INSIGHT_SESSION_TOKEN",
    "INSIGHT_CHUNK_STRATEGY",
    "INSIGHT_CHUNK_SIZE",
    "INSIGHT_CHUNK_OVERLAP",
    "INSIGHT_MATCH_COUNT",
    "INSIGHT_SIMILARITY_THRESHOLD",
    "INSIGHT_ANSWER_TIMEOUT_SECS",
    "INSIGHT_BATCH_SIZE",
    "INSIGHT_BATCH_DELAY_MS",
    "INSIGHT_STUCK_AFTER_SECS",
];

#[derive(Debug, Clone)]
pub struct Settings {
    pub model_api_key: Option<String>,
    pub speech_api_key: Option<String>,
    /// Listener address, `host:port`.
    pub bind_addr: String,
    pub chat_model: String,
    pub embedding_model: String,
    /// Parsed into a chunk strategy at state init.
    pub chunk_strategy: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub match_count: usize,
    pub similarity_threshold: f32,
    pub answer_timeout_secs: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// After this many seconds in `processing`, a transcript reports as stuck.
    pub stuck_after_secs: i64,
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    chat_model: Option<String>,
    embedding_model: Option<String>,
    chunk_strategy: Option<String>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    match_count: Option<usize>,
    similarity_threshold: Option<f32>,
    answer_timeout_secs: Option<u64>,
    batch_size: Option<usize>,
    batch_delay_ms: Option<u64>,
    stuck_after_secs: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_api_key: None,
            speech_api_key: None,
            bind_addr: "127.0.0.1:8787".to_string(),
            chat_model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            chunk_strategy: "sentence".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            match_count: 5,
            similarity_threshold: 0.3,
            answer_timeout_secs: 60,
            batch_size: 3,
            batch_delay_ms: 2000,
            stuck_after_secs: 600,
        }
    }
}

impl Settings {
    pub fn load(paths: &AppPaths) -> Self {
        let file = load_file_settings(paths);
        let mut settings = Settings::default();

        if let Some(v) = file.bind_addr {
            settings.bind_addr = v;
        }
        if let Some(v) = file.chat_model {
            settings.chat_model = v;
        }
        if let Some(v) = file.embedding_model {
            settings.embedding_model = v;
        }
        if let Some(v) = file.chunk_strategy {
            settings.chunk_strategy = v;
        }
        settings.chunk_size = file.chunk_size.unwrap_or(settings.chunk_size);
        settings.chunk_overlap = file.chunk_overlap.unwrap_or(settings.chunk_overlap);
        settings.match_count = file.match_count.unwrap_or(settings.match_count);
        settings.similarity_threshold = file
            .similarity_threshold
            .unwrap_or(settings.similarity_threshold);
        settings.answer_timeout_secs = file
            .answer_timeout_secs
            .unwrap_or(settings.answer_timeout_secs);
        settings.batch_size = file.batch_size.unwrap_or(settings.batch_size);
        settings.batch_delay_ms = file.batch_delay_ms.unwrap_or(settings.batch_delay_ms);
        settings.stuck_after_secs = file.stuck_after_secs.unwrap_or(settings.stuck_after_secs);

        settings.model_api_key = non_empty_env("INSIGHT_MODEL_API_KEY");
        settings.speech_api_key = non_empty_env("INSIGHT_SPEECH_API_KEY");
        if let Some(v) = non_empty_env("INSIGHT_BIND_ADDR") {
            settings.bind_addr = v;
        }
        if let Some(v) = non_empty_env("INSIGHT_CHAT_MODEL") {
            settings.chat_model = v;
        }
        if let Some(v) = non_empty_env("INSIGHT_EMBEDDING_MODEL") {
            settings.embedding_model = v;
        }
        if let Some(v) = non_empty_env("INSIGHT_CHUNK_STRATEGY") {
            settings.chunk_strategy = v;
        }
        if let Some(v) = parse_env::<usize>("INSIGHT_CHUNK_SIZE") {
            settings.chunk_size = v;
        }
        if let Some(v) = parse_env::<usize>("INSIGHT_CHUNK_OVERLAP") {
            settings.chunk_overlap = v;
        }
        if let Some(v) = parse_env::<usize>("INSIGHT_MATCH_COUNT") {
            settings.match_count = v;
        }
        if let Some(v) = parse_env::<f32>("INSIGHT_SIMILARITY_THRESHOLD") {
            settings.similarity_threshold = v;
        }
        if let Some(v) = parse_env::<u64>("INSIGHT_ANSWER_TIMEOUT_SECS") {
            settings.answer_timeout_secs = v;
        }
        if let Some(v) = parse_env::<usize>("INSIGHT_BATCH_SIZE") {
            settings.batch_size = v;
        }
        if let Some(v) = parse_env::<u64>("INSIGHT_BATCH_DELAY_MS") {
            settings.batch_delay_ms = v;
        }
        if let Some(v) = parse_env::<i64>("INSIGHT_STUCK_AFTER_SECS") {
            settings.stuck_after_secs = v;
        }

        settings
    }

    /// Presence report for the env-check endpoint: one entry per variable the
    /// service reads, reporting whether it is set, never its value.
    pub fn env_report(&self) -> Value {
        let mut optional = serde_json::Map::new();
        for key in OPTIONAL_ENV_KEYS {
            optional.insert(key.to_string(), json!(env::var(key).is_ok()));
        }

        json!({
            "required": {
                "INSIGHT_MODEL_API_KEY": self.model_api_key.is_some(),
            },
            "optional": optional,
            "all_required_present": self.model_api_key.is_some(),
        })
    }
}

fn load_file_settings(paths: &AppPaths) -> FileSettings {
    let path = paths.data_dir.join("config.toml");
    let Ok(raw) = fs::read_to_string(&path) else {
        return FileSettings::default();
    };
    match toml::from_str::<FileSettings>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!("Ignoring malformed config.toml: {}", err);
            FileSettings::default()
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_report_names_every_configurable_key() {
        let report = Settings::default().env_report();

        let required = report["required"].as_object().unwrap();
        assert!(required.contains_key("INSIGHT_MODEL_API_KEY"));

        let optional = report["optional"].as_object().unwrap();
        for key in [
            "INSIGHT_SPEECH_API_KEY",
            "INSIGHT_BIND_ADDR",
            "INSIGHT_CHAT_MODEL",
            "INSIGHT_EMBEDDING_MODEL",
            "INSIGHT_DATA_DIR",
            "INSIGHT_SESSION_TOKEN",
            "INSIGHT_CHUNK_STRATEGY",
            "INSIGHT_CHUNK_SIZE",
            "INSIGHT_CHUNK_OVERLAP",
            "INSIGHT_MATCH_COUNT",
            "INSIGHT_SIMILARITY_THRESHOLD",
            "INSIGHT_ANSWER_TIMEOUT_SECS",
            "INSIGHT_BATCH_SIZE",
            "INSIGHT_BATCH_DELAY_MS",
            "INSIGHT_STUCK_AFTER_SECS",
        ] {
            assert!(optional.contains_key(key), "env-check omits {key}");
        }

        // Presence only; no entry ever carries a value.
        for (_, entry) in optional {
            assert!(entry.is_boolean());
        }
    }
}
