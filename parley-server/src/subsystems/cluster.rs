//! Automatic topic clustering of conversations.
//!
//! Builds a pairwise cosine distance matrix from stored conversation
//! embeddings, runs density clustering over it, and replaces all previously
//! auto-generated clusters in a single transaction. Noise points are left
//! unassigned.

use crate::state::AppState;
use parley_core::density;
use parley_core::models::{Cluster, Conversation};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Colors cycled across generated clusters.
pub const CLUSTER_PALETTE: [&str; 10] = [
    "#6366f1", "#8b5cf6", "#06b6d4", "#10b981", "#f59e0b", "#ef4444", "#f97316", "#84cc16",
    "#ec4899", "#6b7280",
];

/// Summary of one clustering run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterRunReport {
    pub clusters_created: usize,
    pub conversations_clustered: usize,
    pub total_candidates: usize,
    pub message: Option<String>,
}

impl ClusterRunReport {
    fn empty(total_candidates: usize, message: impl Into<String>) -> Self {
        Self {
            clusters_created: 0,
            conversations_clustered: 0,
            total_candidates,
            message: Some(message.into()),
        }
    }
}

/// Per-run overrides of the configured clustering tunables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterTuning {
    pub min_cluster_size: Option<u32>,
    pub max_clusters: Option<u32>,
    pub similarity_threshold: Option<f32>,
}

/// Run clustering synchronously and replace the auto-generated clusters.
pub async fn auto_cluster(
    state: &AppState,
    tuning: ClusterTuning,
) -> anyhow::Result<ClusterRunReport> {
    let config = &state.config.clustering;
    let min_cluster_size = tuning
        .min_cluster_size
        .unwrap_or(config.min_cluster_size) as usize;
    let max_clusters = tuning.max_clusters.unwrap_or(config.max_clusters) as usize;
    let similarity_threshold = tuning
        .similarity_threshold
        .unwrap_or(config.similarity_threshold);

    let rows = sqlx::query("SELECT id FROM conversation_embeddings ORDER BY id")
        .fetch_all(&state.pool)
        .await?;
    let ids: Vec<Uuid> = rows
        .iter()
        .map(|r| r.try_get("id"))
        .collect::<Result<_, _>>()?;

    if ids.len() < min_cluster_size {
        return Ok(ClusterRunReport::empty(
            ids.len(),
            format!(
                "Need at least {} conversations with embeddings, found {}",
                min_cluster_size,
                ids.len()
            ),
        ));
    }

    let (present, sims) = state.conversations.similarity_matrix(&ids).await?;
    if present.len() < min_cluster_size {
        return Ok(ClusterRunReport::empty(
            present.len(),
            format!(
                "Need at least {} conversations with embeddings, found {}",
                min_cluster_size,
                present.len()
            ),
        ));
    }

    let eps = 1.0 - similarity_threshold;
    let distances = sims.mapv(|s| 1.0 - s);
    let outcome = density::cluster(&distances, min_cluster_size, eps);

    if outcome.cluster_count == 0 {
        return Ok(ClusterRunReport::empty(
            present.len(),
            "No clusters found at the configured similarity threshold",
        ));
    }

    let groups = label_groups(&outcome.labels, outcome.cluster_count, max_clusters);

    let profiles = load_profiles(&state.pool, &present).await?;

    let mut tx = state.pool.begin().await?;

    // Previous auto-generated clusters are replaced wholesale.
    sqlx::query(
        "DELETE FROM cluster_assignments
         WHERE cluster_id IN (SELECT id FROM clusters WHERE auto_generated)",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM clusters WHERE auto_generated")
        .execute(&mut *tx)
        .await?;

    let mut conversations_clustered = 0;
    for (ordinal, members) in groups.iter().enumerate() {
        let texts: Vec<String> = members
            .iter()
            .map(|&i| {
                profiles
                    .get(&present[i])
                    .map(conversation_text)
                    .unwrap_or_default()
            })
            .collect();
        let paths: Vec<Option<String>> = members
            .iter()
            .map(|&i| {
                profiles
                    .get(&present[i])
                    .and_then(|p| p.project_path.clone())
            })
            .collect();

        let matched = matched_keywords(&texts, &config.keywords);
        let topic = derive_topic(&matched, &paths);
        let name = format!("Auto-Cluster {}: {}", ordinal + 1, title_case(&topic));
        let color = CLUSTER_PALETTE[ordinal % CLUSTER_PALETTE.len()];
        let description = describe_cluster(members.len(), &matched);

        let cluster_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO clusters (id, name, description, color, auto_generated)
             VALUES ($1, $2, $3, $4, TRUE)",
        )
        .bind(cluster_id)
        .bind(&name)
        .bind(&description)
        .bind(color)
        .execute(&mut *tx)
        .await?;

        for &i in members {
            sqlx::query(
                "INSERT INTO cluster_assignments (cluster_id, conversation_id, confidence)
                 VALUES ($1, $2, $3)",
            )
            .bind(cluster_id)
            .bind(present[i])
            .bind(outcome.probabilities[i])
            .execute(&mut *tx)
            .await?;
        }
        conversations_clustered += members.len();
    }

    tx.commit().await?;

    let report = ClusterRunReport {
        clusters_created: groups.len(),
        conversations_clustered,
        total_candidates: present.len(),
        message: None,
    };
    tracing::info!(
        clusters = report.clusters_created,
        conversations = report.conversations_clustered,
        candidates = report.total_candidates,
        "Auto-clustering complete"
    );
    Ok(report)
}

/// Run clustering in the background. Errors are logged, not surfaced.
pub fn spawn_auto_cluster(state: Arc<AppState>, tuning: ClusterTuning) {
    tokio::spawn(async move {
        if let Err(e) = auto_cluster(&state, tuning).await {
            tracing::error!(error = %e, "Background clustering run failed");
        }
    });
}

/// List all clusters, newest first.
pub async fn list_clusters(pool: &PgPool) -> anyhow::Result<Vec<Cluster>> {
    let clusters: Vec<Cluster> = sqlx::query_as(
        "SELECT id, name, description, color, auto_generated, created_at
         FROM clusters ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(clusters)
}

/// Delete a cluster and its assignments. Returns false for an unknown id.
pub async fn delete_cluster(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cluster_assignments WHERE cluster_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM clusters WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Manually place a conversation in a cluster. Re-assigning updates the
/// confidence instead of duplicating the row.
pub async fn assign_conversation(
    pool: &PgPool,
    cluster_id: Uuid,
    conversation_id: Uuid,
    confidence: f32,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO cluster_assignments (cluster_id, conversation_id, confidence)
         VALUES ($1, $2, $3)
         ON CONFLICT (cluster_id, conversation_id)
         DO UPDATE SET confidence = EXCLUDED.confidence",
    )
    .bind(cluster_id)
    .bind(conversation_id)
    .bind(confidence)
    .execute(pool)
    .await?;
    Ok(())
}

fn conversation_text(c: &Conversation) -> String {
    [c.title.as_deref(), c.summary.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
}

async fn load_profiles(
    pool: &PgPool,
    ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, Conversation>> {
    let conversations: Vec<Conversation> = sqlx::query_as(
        "SELECT id, session_id, title, summary, project_path,
                started_at, ended_at, message_count
         FROM conversations WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(conversations.into_iter().map(|c| (c.id, c)).collect())
}

/// Group point indices per label, capped at `max_clusters`. Labels are kept
/// in discovery order; conversations in discarded labels stay unassigned.
fn label_groups(
    labels: &[Option<usize>],
    cluster_count: usize,
    max_clusters: usize,
) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); cluster_count];
    for (i, label) in labels.iter().enumerate() {
        if let Some(label) = label {
            groups[*label].push(i);
        }
    }
    groups.truncate(max_clusters);
    groups
}

/// Vocabulary keywords that appear in any member's text, in vocabulary order.
fn matched_keywords(texts: &[String], keywords: &[String]) -> Vec<String> {
    let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
    keywords
        .iter()
        .filter(|k| lowered.iter().any(|t| t.contains(k.as_str())))
        .cloned()
        .collect()
}

/// Pick a topic for a cluster: the first three matched keywords, then a
/// shared project path suffix, then a generic fallback.
fn derive_topic(matched: &[String], paths: &[Option<String>]) -> String {
    if !matched.is_empty() {
        return matched
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
    }

    if let Some(suffix) = common_path_suffix(paths) {
        return suffix;
    }

    "Mixed Topics".to_string()
}

fn describe_cluster(member_count: usize, matched: &[String]) -> String {
    let mut description = format!(
        "Automatically generated cluster of {} conversations",
        member_count
    );
    if !matched.is_empty() {
        let topics = matched.iter().take(5).cloned().collect::<Vec<_>>();
        description.push_str(&format!(" about {}", topics.join(", ")));
    }
    description
}

/// Longest common trailing path segments shared by every member, rendered as
/// at most the last two segments. Returns `None` unless every member has a
/// path and at least one segment is shared.
fn common_path_suffix(paths: &[Option<String>]) -> Option<String> {
    let segments: Vec<Vec<&str>> = paths
        .iter()
        .map(|p| {
            p.as_deref()
                .map(|p| p.split('/').filter(|s| !s.is_empty()).collect())
        })
        .collect::<Option<_>>()?;

    let first = segments.first()?;
    if first.is_empty() {
        return None;
    }

    let mut shared = 0;
    'outer: for depth in 1..=first.len() {
        let candidate = first[first.len() - depth];
        for other in &segments[1..] {
            if other.len() < depth || other[other.len() - depth] != candidate {
                break 'outer;
            }
        }
        shared = depth;
    }

    if shared == 0 {
        return None;
    }

    let tail = &first[first.len() - shared.min(2)..];
    Some(tail.join("/"))
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_cycles_after_ten() {
        assert_eq!(CLUSTER_PALETTE[0], "#6366f1");
        assert_eq!(CLUSTER_PALETTE[10 % CLUSTER_PALETTE.len()], "#6366f1");
        assert_eq!(CLUSTER_PALETTE[11 % CLUSTER_PALETTE.len()], "#8b5cf6");
    }

    #[test]
    fn test_label_groups_cap_keeps_earliest_labels() {
        // Label 1 has more members, but the cap keeps labels in the order the
        // clustering discovered them.
        let labels = vec![
            Some(0),
            Some(1),
            Some(1),
            Some(0),
            Some(1),
            None,
            Some(1),
            Some(1),
        ];

        let groups = label_groups(&labels, 2, 1);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], vec![0, 3]);
    }

    #[test]
    fn test_label_groups_without_cap_keeps_all_labels() {
        let labels = vec![Some(0), Some(1), Some(0), None];

        let groups = label_groups(&labels, 2, 20);

        assert_eq!(groups, vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_matched_keywords_scan_is_case_insensitive() {
        let texts = vec![
            "Fixing a React rendering bug".to_string(),
            "API design review".to_string(),
            "Deploying the service".to_string(),
        ];
        let keywords = vec![
            "react".to_string(),
            "api".to_string(),
            "database".to_string(),
        ];

        assert_eq!(matched_keywords(&texts, &keywords), vec!["react", "api"]);
    }

    #[test]
    fn test_derive_topic_joins_first_three_keywords() {
        let matched = vec![
            "react".to_string(),
            "api".to_string(),
            "testing".to_string(),
            "security".to_string(),
        ];

        assert_eq!(derive_topic(&matched, &[]), "react, api, testing");
    }

    #[test]
    fn test_derive_topic_falls_back_to_path_suffix() {
        let paths = vec![
            Some("/home/alice/work/billing-service".to_string()),
            Some("/home/bob/work/billing-service".to_string()),
        ];

        assert_eq!(derive_topic(&[], &paths), "work/billing-service");
    }

    #[test]
    fn test_derive_topic_mixed_without_keywords_or_paths() {
        assert_eq!(derive_topic(&[], &[None, None]), "Mixed Topics");
    }

    #[test]
    fn test_describe_cluster_caps_keywords_at_five() {
        let matched: Vec<String> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let description = describe_cluster(7, &matched);
        assert!(description.starts_with("Automatically generated cluster of 7 conversations"));
        assert!(description.ends_with("about a, b, c, d, e"));
    }

    #[test]
    fn test_describe_cluster_without_keywords() {
        assert_eq!(
            describe_cluster(4, &[]),
            "Automatically generated cluster of 4 conversations"
        );
    }

    #[test]
    fn test_common_path_suffix_none_when_any_path_missing() {
        let paths = vec![Some("/a/b".to_string()), None];
        assert_eq!(common_path_suffix(&paths), None);
    }

    #[test]
    fn test_common_path_suffix_none_without_shared_segment() {
        let paths = vec![Some("/a/b".to_string()), Some("/c/d".to_string())];
        assert_eq!(common_path_suffix(&paths), None);
    }

    #[test]
    fn test_common_path_suffix_caps_at_two_segments() {
        let paths = vec![
            Some("/home/dev/work/app".to_string()),
            Some("/home/dev/work/app".to_string()),
        ];
        assert_eq!(common_path_suffix(&paths), Some("work/app".to_string()));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("machine learning"), "Machine Learning");
        assert_eq!(title_case("react"), "React");
        assert_eq!(title_case("Mixed Topics"), "Mixed Topics");
    }

    #[test]
    fn test_empty_report_carries_message() {
        let report = ClusterRunReport::empty(2, "too few");
        assert_eq!(report.clusters_created, 0);
        assert_eq!(report.total_candidates, 2);
        assert!(report.message.is_some());
    }
}
