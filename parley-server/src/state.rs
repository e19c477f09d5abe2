use parley_core::embeddings::EmbeddingBackend;
use parley_core::index::{Collection, VectorIndex};
use parley_core::ParleyConfig;
use sqlx::PgPool;
use std::sync::Arc;

/// Shared state for the IPC router and HTTP handlers.
///
/// The embedding backend is constructed once at startup; every request path
/// goes through the same instance.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: ParleyConfig,
    pub backend: Arc<dyn EmbeddingBackend>,
    pub conversations: VectorIndex,
    pub messages: VectorIndex,
}

impl AppState {
    pub fn new(pool: PgPool, config: ParleyConfig, backend: Arc<dyn EmbeddingBackend>) -> Self {
        let conversations = VectorIndex::new(
            pool.clone(),
            Collection::Conversation,
            config.index.conversation_dimensions as usize,
        );
        let messages = VectorIndex::new(
            pool.clone(),
            Collection::Message,
            config.index.message_dimensions as usize,
        );
        Self {
            pool,
            config,
            backend,
            conversations,
            messages,
        }
    }
}
