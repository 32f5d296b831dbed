pub mod error;
pub mod types;
pub mod value;

pub use error::{CancellationReason, DomainError, EntityKind, Result, StoreError};
pub use types::{Item, ItemKey, TableSchema, from_item, to_item};
pub use value::Value;
