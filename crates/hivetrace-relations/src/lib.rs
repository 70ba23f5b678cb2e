mod engine;
mod error;

pub use engine::{
    EdgeRequest, RelationshipQuery, RelationshipStats, RelationshipStore, RelationshipView,
    SessionTreeNode,
};
pub use error::{Error, Result};
