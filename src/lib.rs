//! Obsgraph: Observer Contexts over an Object Graph
//!
//! Objects are observed by named contexts that filter which subjects they
//! accept, track per-context names and ownership, and can be exported to a
//! compact binary stream and rebuilt elsewhere from a relational table.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod logging;
pub mod manager;
pub mod object;
pub mod observer;
pub mod property;
pub mod relational;
pub mod store;
pub mod types;

pub use error::{ApiError, CodecError, ObserverError, RelationError, StorageError};
pub use factory::{FactoryData, FactoryRegistry, ObjectFactory};
pub use manager::{ConstructionReport, NotificationSuppression, ObjectManager, TransferResult};
pub use object::{ObjectData, Ownership};
pub use observer::{Evaluation, ObserverContext, ObserverEvent};
pub use property::{PropertyKey, PropertyStore, Variant};
pub use relational::{RelationalTable, TableMode};
pub use types::{ObjectId, SessionId, VisitorId, GLOBAL_POOL_ID};
