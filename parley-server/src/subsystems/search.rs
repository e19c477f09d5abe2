//! Conversation and message search: text, semantic, and hybrid.
//!
//! Text search matches stored content with ILIKE. Semantic search goes
//! through the matching vector index. Hybrid runs both and merges, with
//! semantic scores winning for rows found by both passes.

use crate::state::AppState;
use parley_core::config::SearchConfig;
use parley_core::ipc::{SearchFilters, SearchMode};
use parley_core::models::{Conversation, Message};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// One search result, regardless of which pass produced it.
///
/// `similarity` is 0.0 for hits found only by the text pass.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub content: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
}

/// Run a search in the requested mode and record it in the audit trail.
pub async fn search_conversations(
    state: &AppState,
    query: &str,
    limit: Option<u32>,
    mode: SearchMode,
    filters: &SearchFilters,
) -> anyhow::Result<Vec<SearchHit>> {
    let limit = clamp_limit(limit, &state.config.search);
    let start = std::time::Instant::now();

    let hits = match mode {
        SearchMode::Text => text_search(&state.pool, query, filters, limit).await?,
        SearchMode::Semantic => semantic_search(state, query, filters, limit).await?,
        SearchMode::Hybrid => {
            let semantic = semantic_search(state, query, filters, limit).await?;
            let text = text_search(&state.pool, query, filters, limit).await?;
            merge_hybrid(semantic, text, limit as usize)
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as i64;
    record_search(&state.pool, query, mode, hits.len(), elapsed_ms).await;

    Ok(hits)
}

/// Run a message-level search in the requested mode and record it in the
/// audit trail.
///
/// The role filter applies here: messages carry a role, conversations do not.
pub async fn search_messages(
    state: &AppState,
    query: &str,
    limit: Option<u32>,
    mode: SearchMode,
    filters: &SearchFilters,
) -> anyhow::Result<Vec<SearchHit>> {
    let limit = clamp_limit(limit, &state.config.search);
    let start = std::time::Instant::now();

    let hits = match mode {
        SearchMode::Text => message_text_search(&state.pool, query, filters, limit).await?,
        SearchMode::Semantic => message_semantic_search(state, query, filters, limit).await?,
        SearchMode::Hybrid => {
            let semantic = message_semantic_search(state, query, filters, limit).await?;
            let text = message_text_search(&state.pool, query, filters, limit).await?;
            merge_hybrid(semantic, text, limit as usize)
        }
    };

    let elapsed_ms = start.elapsed().as_millis() as i64;
    record_search(&state.pool, query, mode, hits.len(), elapsed_ms).await;

    Ok(hits)
}

/// Find conversations similar to an existing one.
///
/// A conversation without a stored embedding yields an empty result rather
/// than an error. The conversation itself is never returned, and hits below
/// the configured similarity threshold are dropped.
pub async fn find_similar(
    state: &AppState,
    id: Uuid,
    limit: Option<u32>,
    threshold: Option<f32>,
) -> anyhow::Result<Vec<SearchHit>> {
    let limit = clamp_limit(limit, &state.config.search) as usize;

    let vector = match state.conversations.get_vector(id).await? {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };

    // Over-fetch by one because the query vector's own row comes back first.
    let results = state
        .conversations
        .query(&vector, (limit + 1) as i64, None)
        .await?;

    let threshold = threshold.unwrap_or(state.config.search.similarity_threshold);
    let mut hits: Vec<SearchHit> = results
        .into_iter()
        .filter(|r| r.id != id && r.similarity >= threshold)
        .map(|r| SearchHit {
            id: r.id,
            content: r.content,
            metadata: r.metadata,
            similarity: r.similarity,
        })
        .collect();
    hits.truncate(limit);

    Ok(hits)
}

fn clamp_limit(limit: Option<u32>, config: &SearchConfig) -> i64 {
    limit
        .unwrap_or(config.default_limit)
        .min(config.max_results)
        .max(1) as i64
}

/// Translate search filters into a JSONB containment filter for the index.
///
/// Date ranges cannot be expressed as containment; the semantic pass skips
/// them and relies on the text pass for date filtering in hybrid mode.
fn index_filters(filters: &SearchFilters) -> Option<serde_json::Value> {
    if filters.date_from.is_some() || filters.date_to.is_some() {
        tracing::debug!("Date filters are not applied to the semantic pass");
    }
    if filters.role.is_some() {
        tracing::debug!("Role filters only apply to message search");
    }

    filters
        .project_path
        .as_ref()
        .map(|p| serde_json::json!({ "project_path": p }))
}

/// Containment filter for the message index. Message metadata carries the
/// role, so the role filter is honored on the semantic pass.
fn message_index_filters(filters: &SearchFilters) -> Option<serde_json::Value> {
    if filters.date_from.is_some() || filters.date_to.is_some() {
        tracing::debug!("Date filters are not applied to the semantic pass");
    }

    filters
        .role
        .as_ref()
        .map(|r| serde_json::json!({ "role": r }))
}

async fn semantic_search(
    state: &AppState,
    query: &str,
    filters: &SearchFilters,
    limit: i64,
) -> anyhow::Result<Vec<SearchHit>> {
    let vector = state.backend.embed_query(query).await?;
    let results = state
        .conversations
        .query(&vector, limit, index_filters(filters))
        .await?;

    Ok(results
        .into_iter()
        .map(|r| SearchHit {
            id: r.id,
            content: r.content,
            metadata: r.metadata,
            similarity: r.similarity,
        })
        .collect())
}

async fn text_search(
    pool: &PgPool,
    query: &str,
    filters: &SearchFilters,
    limit: i64,
) -> anyhow::Result<Vec<SearchHit>> {
    let pattern = format!("%{}%", query);

    let conversations: Vec<Conversation> = sqlx::query_as(
        "SELECT id, session_id, title, summary, project_path,
                started_at, ended_at, message_count
         FROM conversations
         WHERE (title ILIKE $1 OR summary ILIKE $1)
           AND ($2::text IS NULL OR project_path = $2)
           AND ($3::timestamptz IS NULL OR started_at >= $3)
           AND ($4::timestamptz IS NULL OR started_at <= $4)
         ORDER BY started_at DESC
         LIMIT $5",
    )
    .bind(&pattern)
    .bind(&filters.project_path)
    .bind(filters.date_from)
    .bind(filters.date_to)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(conversations
        .into_iter()
        .map(|c| SearchHit {
            id: c.id,
            content: c.title.or(c.summary).unwrap_or_default(),
            metadata: serde_json::json!({
                "project_path": c.project_path,
                "started_at": c.started_at,
            }),
            similarity: 0.0,
        })
        .collect())
}

async fn message_semantic_search(
    state: &AppState,
    query: &str,
    filters: &SearchFilters,
    limit: i64,
) -> anyhow::Result<Vec<SearchHit>> {
    let vector = state.backend.embed_query(query).await?;
    let results = state
        .messages
        .query(&vector, limit, message_index_filters(filters))
        .await?;

    Ok(results
        .into_iter()
        .map(|r| SearchHit {
            id: r.id,
            content: r.content,
            metadata: r.metadata,
            similarity: r.similarity,
        })
        .collect())
}

async fn message_text_search(
    pool: &PgPool,
    query: &str,
    filters: &SearchFilters,
    limit: i64,
) -> anyhow::Result<Vec<SearchHit>> {
    let pattern = format!("%{}%", query);

    let messages: Vec<Message> = sqlx::query_as(
        "SELECT id, conversation_id, role, content, created_at
         FROM messages
         WHERE content ILIKE $1
           AND ($2::text IS NULL OR role = $2)
           AND ($3::timestamptz IS NULL OR created_at >= $3)
           AND ($4::timestamptz IS NULL OR created_at <= $4)
         ORDER BY created_at DESC
         LIMIT $5",
    )
    .bind(&pattern)
    .bind(&filters.role)
    .bind(filters.date_from)
    .bind(filters.date_to)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(messages
        .into_iter()
        .map(|m| SearchHit {
            id: m.id,
            content: m.content,
            metadata: serde_json::json!({
                "conversation_id": m.conversation_id,
                "role": m.role,
            }),
            similarity: 0.0,
        })
        .collect())
}

/// Merge the two hybrid passes.
///
/// Semantic hits keep their scores. Text-only hits are appended with a score
/// of 0.0, the combined list is stably sorted by score descending, and only
/// then truncated to `limit`.
fn merge_hybrid(semantic: Vec<SearchHit>, text: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut merged = semantic;
    let seen: std::collections::HashSet<Uuid> = merged.iter().map(|h| h.id).collect();

    for mut hit in text {
        if !seen.contains(&hit.id) {
            hit.similarity = 0.0;
            merged.push(hit);
        }
    }

    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(limit);
    merged
}

/// Append one row to the search audit trail. Failures are logged and
/// swallowed so auditing can never break a search.
async fn record_search(
    pool: &PgPool,
    query: &str,
    mode: SearchMode,
    result_count: usize,
    execution_time_ms: i64,
) {
    let result = sqlx::query(
        "INSERT INTO search_queries (id, query, mode, result_count, execution_time_ms)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(query)
    .bind(mode.as_str())
    .bind(result_count as i32)
    .bind(execution_time_ms)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, "Failed to record search query");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: u128, similarity: f32) -> SearchHit {
        SearchHit {
            id: Uuid::from_u128(id),
            content: format!("conversation {id}"),
            metadata: serde_json::json!({}),
            similarity,
        }
    }

    #[test]
    fn test_merge_hybrid_semantic_score_wins() {
        let semantic = vec![hit(1, 0.9), hit(2, 0.8)];
        let text = vec![hit(1, 0.0), hit(3, 0.0)];

        let merged = merge_hybrid(semantic, text, 10);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, Uuid::from_u128(1));
        assert!((merged[0].similarity - 0.9).abs() < f32::EPSILON);
        assert_eq!(merged[2].id, Uuid::from_u128(3));
        assert_eq!(merged[2].similarity, 0.0);
    }

    #[test]
    fn test_merge_hybrid_truncates_after_merge() {
        let semantic = vec![hit(1, 0.9), hit(2, 0.8)];
        let text = vec![hit(3, 0.0), hit(4, 0.0)];

        let merged = merge_hybrid(semantic, text, 2);

        // Highest-scoring hits survive; text-only hits fall off the end.
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, Uuid::from_u128(1));
        assert_eq!(merged[1].id, Uuid::from_u128(2));
    }

    #[test]
    fn test_merge_hybrid_preserves_text_order_for_ties() {
        let semantic = vec![];
        let text = vec![hit(5, 0.0), hit(6, 0.0), hit(7, 0.0)];

        let merged = merge_hybrid(semantic, text, 10);

        assert_eq!(merged[0].id, Uuid::from_u128(5));
        assert_eq!(merged[1].id, Uuid::from_u128(6));
        assert_eq!(merged[2].id, Uuid::from_u128(7));
    }

    #[test]
    fn test_clamp_limit_bounds() {
        let config = SearchConfig {
            default_limit: 10,
            max_results: 50,
            similarity_threshold: 0.7,
        };

        assert_eq!(clamp_limit(None, &config), 10);
        assert_eq!(clamp_limit(Some(5), &config), 5);
        assert_eq!(clamp_limit(Some(500), &config), 50);
        assert_eq!(clamp_limit(Some(0), &config), 1);
    }

    #[test]
    fn test_index_filters_project_path_only() {
        let filters = SearchFilters {
            project_path: Some("/home/dev/app".to_string()),
            role: None,
            date_from: Some(chrono::Utc::now()),
            date_to: None,
        };

        let json = index_filters(&filters).unwrap();
        assert_eq!(json["project_path"], "/home/dev/app");
        // Date bounds never reach the containment filter.
        assert!(json.get("date_from").is_none());
    }

    #[test]
    fn test_index_filters_empty() {
        assert!(index_filters(&SearchFilters::default()).is_none());
    }

    #[test]
    fn test_index_filters_role_does_not_reach_conversation_index() {
        let filters = SearchFilters {
            role: Some("user".to_string()),
            ..SearchFilters::default()
        };

        assert!(index_filters(&filters).is_none());
    }

    #[test]
    fn test_message_index_filters_map_role() {
        let filters = SearchFilters {
            project_path: Some("/home/dev/app".to_string()),
            role: Some("assistant".to_string()),
            date_from: None,
            date_to: None,
        };

        let json = message_index_filters(&filters).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("project_path").is_none());
    }
}
