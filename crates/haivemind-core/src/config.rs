//! Structured configuration document. TOML on disk, loaded at startup (§6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::confidence::{
    WEIGHT_CONSENSUS, WEIGHT_CONTEXT_RELEVANCE, WEIGHT_FRESHNESS, WEIGHT_NO_CONTRADICTION,
    WEIGHT_SOURCE_CREDIBILITY, WEIGHT_USAGE_SUCCESS, WEIGHT_VERIFICATION,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub port: u16,
    pub peers: Vec<crate::sync::PeerConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            port: 8899,
            peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub uri: Option<String>,
    pub password: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { uri: None, password: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub vector_root: Option<PathBuf>,
    pub cache: CacheConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector_root: None,
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CategoriesConfig {
    pub half_life_days: HashMap<String, f64>,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self { half_life_days: HashMap::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfidenceConfig {
    pub weights: HashMap<String, f64>,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("freshness".to_string(), WEIGHT_FRESHNESS);
        weights.insert("source_credibility".to_string(), WEIGHT_SOURCE_CREDIBILITY);
        weights.insert("verification".to_string(), WEIGHT_VERIFICATION);
        weights.insert("consensus".to_string(), WEIGHT_CONSENSUS);
        weights.insert("no_contradiction".to_string(), WEIGHT_NO_CONTRADICTION);
        weights.insert("usage_success".to_string(), WEIGHT_USAGE_SUCCESS);
        weights.insert("context_relevance".to_string(), WEIGHT_CONTEXT_RELEVANCE);
        Self { weights }
    }
}

impl ConfidenceConfig {
    /// Validate that weights sum to 1.0 within the ± 0.01 tolerance named
    /// in SPEC_FULL.md §6.
    pub fn validate(&self) -> Result<()> {
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(ConfigError::Invalid(format!(
                "confidence.weights must sum to 1.0 +/- 0.01, got {sum}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoftDeleteConfig {
    pub ttl_days: u32,
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self { ttl_days: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HardDeleteConfig {
    pub tombstone_grace_days: u32,
}

impl Default for HardDeleteConfig {
    fn default() -> Self {
        Self { tombstone_grace_days: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DedupConfig {
    pub similarity_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { similarity_threshold: 0.90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchConfig {
    pub hybrid_alpha: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { hybrid_alpha: 0.70 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct McpHttpConfig {
    pub rate_limit_rps: u32,
    pub max_concurrent: u32,
    /// Bearer token clients must present to `POST /mcp` and `GET /sse`.
    /// `None` disables auth entirely (local/stdio-equivalent trust), which
    /// is the default so a bare `cargo run` keeps working without config.
    pub auth_token: Option<String>,
}

impl Default for McpHttpConfig {
    fn default() -> Self {
        Self {
            rate_limit_rps: 50,
            max_concurrent: 256,
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct McpConfig {
    pub http: McpHttpConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self { http: McpHttpConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PiiConfig {
    pub audit_enabled: bool,
    pub allowed_machines: Option<Vec<String>>,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            audit_enabled: true,
            allowed_machines: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// The full configuration document, as loaded from `HAIVEMIND_CONFIG` (or
/// the platform default config path) at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub categories: CategoriesConfig,
    pub confidence: ConfidenceConfig,
    pub soft_delete: SoftDeleteConfig,
    pub hard_delete: HardDeleteConfig,
    pub dedup: DedupConfig,
    pub search: SearchConfig,
    pub mcp: McpConfig,
    pub pii: PiiConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load from `HAIVEMIND_CONFIG` if set, else `path`; falls back to
    /// defaults entirely if neither exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = std::env::var("HAIVEMIND_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| path.map(|p| p.to_path_buf()));

        let config = match resolved {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
                toml::from_str(&text)?
            }
            _ => Config::default(),
        };

        config.confidence.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_confidence_weights_sum_to_one() {
        ConfidenceConfig::default().validate().unwrap();
    }

    #[test]
    fn unbalanced_weights_are_rejected() {
        let mut confidence = ConfidenceConfig::default();
        confidence.weights.insert("freshness".to_string(), 0.9);
        assert!(confidence.validate().is_err());
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/path.toml"))).unwrap();
        assert_eq!(config.server.port, 8900);
    }
}
