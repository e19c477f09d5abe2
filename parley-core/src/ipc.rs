use serde::{Deserialize, Serialize};

/// How search results are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Text,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Text => "text",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Optional constraints applied to a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub project_path: Option<String>,
    pub role: Option<String>,
    pub date_from: Option<chrono::DateTime<chrono::Utc>>,
    pub date_to: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ParleyRequest {
    Ping,
    Health,
    Search {
        query: String,
        limit: Option<u32>,
        #[serde(default)]
        mode: SearchMode,
        #[serde(default)]
        filters: SearchFilters,
    },
    SearchMessages {
        query: String,
        limit: Option<u32>,
        #[serde(default)]
        mode: SearchMode,
        #[serde(default)]
        filters: SearchFilters,
    },
    FindSimilar {
        id: uuid::Uuid,
        limit: Option<u32>,
        threshold: Option<f32>,
    },
    AutoCluster {
        #[serde(default)]
        background: bool,
        min_cluster_size: Option<u32>,
        max_clusters: Option<u32>,
        similarity_threshold: Option<f32>,
    },
    StoreEmbedding {
        conversation_id: uuid::Uuid,
    },
    DeleteEmbedding {
        conversation_id: uuid::Uuid,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ParleyResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl ParleyResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }
}
