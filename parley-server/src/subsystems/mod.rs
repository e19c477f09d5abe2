pub mod cluster;
pub mod embedder;
pub mod search;
