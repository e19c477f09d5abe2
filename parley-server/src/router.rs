use crate::state::AppState;
use crate::subsystems::{cluster, embedder, search};
use parley_core::ipc::{ParleyRequest, ParleyResponse};
use std::sync::Arc;

pub async fn handle_request(request: ParleyRequest, state: &Arc<AppState>) -> ParleyResponse {
    match request {
        ParleyRequest::Ping => ParleyResponse::pong(),
        ParleyRequest::Health => {
            let pg_ver = match parley_core::db::health_check(&state.pool).await {
                Ok(v) => v,
                Err(e) => return ParleyResponse::err(format!("DB health check failed: {}", e)),
            };
            let vec_ver = match parley_core::db::check_pgvector(&state.pool).await {
                Ok(v) => v,
                Err(e) => return ParleyResponse::err(format!("pgvector check failed: {}", e)),
            };
            ParleyResponse::ok(serde_json::json!({
                "postgresql": pg_ver,
                "pgvector": vec_ver,
                "backend": state.backend.name(),
                "status": "healthy"
            }))
        }
        ParleyRequest::Search {
            query,
            limit,
            mode,
            filters,
        } => match search::search_conversations(state, &query, limit, mode, &filters).await {
            Ok(hits) => {
                let count = hits.len();
                ParleyResponse::ok(serde_json::json!({
                    "results": hits,
                    "count": count,
                    "mode": mode.as_str(),
                }))
            }
            Err(e) => ParleyResponse::err(e.to_string()),
        },
        ParleyRequest::SearchMessages {
            query,
            limit,
            mode,
            filters,
        } => match search::search_messages(state, &query, limit, mode, &filters).await {
            Ok(hits) => {
                let count = hits.len();
                ParleyResponse::ok(serde_json::json!({
                    "results": hits,
                    "count": count,
                    "mode": mode.as_str(),
                }))
            }
            Err(e) => ParleyResponse::err(e.to_string()),
        },
        ParleyRequest::FindSimilar {
            id,
            limit,
            threshold,
        } => {
            match search::find_similar(state, id, limit, threshold).await {
                Ok(hits) => {
                    let count = hits.len();
                    ParleyResponse::ok(serde_json::json!({
                        "results": hits,
                        "count": count,
                    }))
                }
                Err(e) => ParleyResponse::err(e.to_string()),
            }
        }
        ParleyRequest::AutoCluster {
            background,
            min_cluster_size,
            max_clusters,
            similarity_threshold,
        } => {
            let tuning = cluster::ClusterTuning {
                min_cluster_size,
                max_clusters,
                similarity_threshold,
            };
            if background {
                cluster::spawn_auto_cluster(Arc::clone(state), tuning);
                ParleyResponse::ok(serde_json::json!({"queued": true}))
            } else {
                match cluster::auto_cluster(state, tuning).await {
                    Ok(report) => ParleyResponse::ok(serde_json::json!({
                        "clusters_created": report.clusters_created,
                        "conversations_clustered": report.conversations_clustered,
                        "total_candidates": report.total_candidates,
                        "message": report.message,
                    })),
                    Err(e) => ParleyResponse::err(e.to_string()),
                }
            }
        }
        ParleyRequest::StoreEmbedding { conversation_id } => {
            embedder::spawn_store_task(Arc::clone(state), conversation_id);
            ParleyResponse::ok(serde_json::json!({
                "queued": true,
                "conversation_id": conversation_id
            }))
        }
        ParleyRequest::DeleteEmbedding { conversation_id } => {
            match embedder::delete_embeddings(state, conversation_id).await {
                Ok(removed) => ParleyResponse::ok(serde_json::json!({
                    "deleted": removed,
                    "conversation_id": conversation_id
                })),
                Err(e) => ParleyResponse::err(e.to_string()),
            }
        }
    }
}
