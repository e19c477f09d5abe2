pub mod config;
pub mod db;
pub mod density;
pub mod embeddings;
pub mod index;
pub mod ipc;
pub mod models;
pub mod onnx_embedder;

pub use config::ParleyConfig;
pub use density::{cluster, ClusteringOutcome};
pub use embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, EmbeddingError, OnnxConfig,
    RemoteConfig, RemoteEmbeddingClient, ONNX_DIMENSIONS,
};
pub use index::{Collection, IndexEntry, IndexError, SimilarityResult, VectorIndex};
pub use onnx_embedder::OnnxEmbeddingClient;
