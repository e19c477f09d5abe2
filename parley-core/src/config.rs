use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ParleyConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Embedding backend selection. `backend` is either `"remote"` or `"onnx"`,
/// chosen once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSettings {
    pub backend: String,
    pub remote_model: String,
    pub remote_dimensions: u32,
    #[serde(default)]
    pub remote_base_url: String,
    #[serde(default)]
    pub onnx_model_path: String,
    pub onnx_dimensions: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_batch_size() -> u32 {
    100
}

/// Dimensionality of the two vector collections. Must match the configured
/// embedding backend's output dimension; a mismatch is a fatal startup error.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub conversation_dimensions: u32,
    pub message_dimensions: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            conversation_dimensions: 384,
            message_dimensions: 384,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub default_limit: u32,
    pub max_results: u32,
    pub similarity_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_results: 50,
            similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    pub min_cluster_size: u32,
    pub max_clusters: u32,
    pub similarity_threshold: f32,
    /// Vocabulary scanned when naming auto-generated clusters.
    #[serde(default = "default_cluster_keywords")]
    pub keywords: Vec<String>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            max_clusters: 20,
            similarity_threshold: 0.8,
            keywords: default_cluster_keywords(),
        }
    }
}

fn default_cluster_keywords() -> Vec<String> {
    [
        "react",
        "python",
        "javascript",
        "api",
        "database",
        "frontend",
        "backend",
        "bug",
        "feature",
        "testing",
        "deployment",
        "authentication",
        "security",
        "performance",
        "ui",
        "ux",
        "design",
        "mobile",
        "web",
        "data",
        "machine learning",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8791,
        }
    }
}

impl ParleyConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clustering_defaults() {
        let c = ClusteringConfig::default();
        assert_eq!(c.min_cluster_size, 3);
        assert_eq!(c.max_clusters, 20);
        assert!((c.similarity_threshold - 0.8).abs() < f32::EPSILON);
        assert!(c.keywords.iter().any(|k| k == "database"));
    }

    #[test]
    fn test_search_defaults() {
        let c = SearchConfig::default();
        assert_eq!(c.default_limit, 10);
        assert_eq!(c.max_results, 50);
    }
}
