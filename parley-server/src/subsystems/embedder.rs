//! Embedding storage: turns conversations and messages into index entries.

use crate::state::AppState;
use parley_core::embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, OnnxConfig, RemoteConfig,
};
use parley_core::index::IndexEntry;
use parley_core::models::Message;
use parley_core::onnx_embedder::resolve_onnx_paths;
use parley_core::ParleyConfig;
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

/// Build the embedding backend the config asks for.
pub fn create_backend_from_config(
    config: &ParleyConfig,
) -> anyhow::Result<Box<dyn EmbeddingBackend>> {
    let backend = match config.embedding.backend.as_str() {
        "onnx" => {
            let (model_path, tokenizer_path) =
                resolve_onnx_paths(&config.embedding.onnx_model_path);
            create_backend(BackendConfig::Onnx(OnnxConfig {
                model_path,
                tokenizer_path,
                dimensions: config.embedding.onnx_dimensions as usize,
            }))?
        }
        _ => {
            let mut remote = RemoteConfig::new(
                None,
                config.embedding.remote_model.clone(),
                config.embedding.remote_dimensions as usize,
            );
            remote.batch_size = config.embedding.batch_size as usize;
            let client: Box<dyn EmbeddingBackend> = if config.embedding.remote_base_url.is_empty() {
                create_backend(BackendConfig::Remote(remote))?
            } else {
                Box::new(parley_core::RemoteEmbeddingClient::with_base_url(
                    remote,
                    config.embedding.remote_base_url.clone(),
                )?)
            };
            client
        }
    };
    Ok(backend)
}

/// Embed a conversation's title and summary and upsert it into the
/// conversation index.
pub async fn store_conversation_embedding(
    state: &AppState,
    conversation_id: Uuid,
) -> anyhow::Result<()> {
    let row = sqlx::query(
        "SELECT title, summary, project_path, started_at
         FROM conversations WHERE id = $1",
    )
    .bind(conversation_id)
    .fetch_optional(&state.pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => anyhow::bail!("Conversation {} not found", conversation_id),
    };

    let title: Option<String> = row.try_get("title")?;
    let summary: Option<String> = row.try_get("summary")?;
    let project_path: Option<String> = row.try_get("project_path")?;
    let started_at: chrono::DateTime<chrono::Utc> = row.try_get("started_at")?;

    let document = [title.as_deref(), summary.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");
    if document.trim().is_empty() {
        anyhow::bail!("Conversation {} has no text to embed", conversation_id);
    }

    let vector = state.backend.embed(&document).await?;
    state
        .conversations
        .add(&[IndexEntry {
            id: conversation_id,
            vector,
            content: document,
            metadata: serde_json::json!({
                "project_path": project_path,
                "started_at": started_at,
            }),
        }])
        .await?;

    tracing::debug!(conversation = %conversation_id, "Stored conversation embedding");
    Ok(())
}

/// Embed every message of a conversation into the message index.
pub async fn store_message_embeddings(
    state: &AppState,
    conversation_id: Uuid,
) -> anyhow::Result<usize> {
    let messages: Vec<Message> = sqlx::query_as(
        "SELECT id, conversation_id, role, content, created_at FROM messages
         WHERE conversation_id = $1 AND content <> ''
         ORDER BY created_at",
    )
    .bind(conversation_id)
    .fetch_all(&state.pool)
    .await?;

    if messages.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
    let vectors = state.backend.embed_batch(&texts).await?;

    let entries: Vec<IndexEntry> = messages
        .into_iter()
        .zip(vectors)
        .map(|(message, vector)| IndexEntry {
            id: message.id,
            vector,
            content: message.content,
            metadata: serde_json::json!({
                "conversation_id": conversation_id,
                "role": message.role,
            }),
        })
        .collect();

    let count = entries.len();
    state.messages.add(&entries).await?;

    tracing::debug!(
        conversation = %conversation_id,
        messages = count,
        "Stored message embeddings"
    );
    Ok(count)
}

/// Remove a conversation's entries from both indexes.
pub async fn delete_embeddings(state: &AppState, conversation_id: Uuid) -> anyhow::Result<u64> {
    let rows = sqlx::query("SELECT id FROM messages WHERE conversation_id = $1")
        .bind(conversation_id)
        .fetch_all(&state.pool)
        .await?;
    let message_ids: Vec<Uuid> = rows
        .iter()
        .map(|r| r.try_get("id"))
        .collect::<Result<_, _>>()?;

    let mut removed = state.conversations.delete(&[conversation_id]).await?;
    if !message_ids.is_empty() {
        removed += state.messages.delete(&message_ids).await?;
    }
    Ok(removed)
}

/// Store conversation and message embeddings in the background. Failures are
/// logged and swallowed; transcript writes never wait on embedding.
pub fn spawn_store_task(state: Arc<AppState>, conversation_id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = store_conversation_embedding(&state, conversation_id).await {
            tracing::warn!(
                conversation = %conversation_id,
                error = %e,
                "Failed to store conversation embedding"
            );
            return;
        }
        if let Err(e) = store_message_embeddings(&state, conversation_id).await {
            tracing::warn!(
                conversation = %conversation_id,
                error = %e,
                "Failed to store message embeddings"
            );
        }
    });
}
