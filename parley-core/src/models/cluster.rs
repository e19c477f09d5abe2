use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A topic cluster of conversations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub auto_generated: bool,
    pub created_at: DateTime<Utc>,
}

/// Membership of a conversation in a cluster.
///
/// `confidence` is the clustering probability of this conversation itself,
/// not a cluster-wide value.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClusterAssignment {
    pub cluster_id: Uuid,
    pub conversation_id: Uuid,
    pub confidence: f32,
    pub assigned_at: DateTime<Utc>,
}
