use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A recorded conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub project_path: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: i32,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the search audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SearchQueryRecord {
    pub id: Uuid,
    pub query: String,
    pub mode: String,
    pub result_count: i32,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}
