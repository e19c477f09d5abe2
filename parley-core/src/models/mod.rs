pub mod cluster;
pub mod conversation;

pub use cluster::{Cluster, ClusterAssignment};
pub use conversation::{Conversation, Message, SearchQueryRecord};
