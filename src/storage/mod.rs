pub mod condition;
pub mod engine;
pub mod memory;
pub mod ops;

pub use condition::{Condition, UpdateAction};
pub use engine::KeyValueStore;
pub use memory::{InMemoryStore, InMemoryStoreConfig};
pub use ops::{Cursor, QueryOutput, QueryRequest, WriteOp};
