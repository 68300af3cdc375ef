pub mod chat;
pub mod config;
pub mod creation;
pub mod errors;
pub mod events;
pub mod storage;

pub use creation::{Creation, CreationDescriptor, SourceKind};
pub use errors::{
    BoxedError, ConversionError, CreationSchemaError, GenerationError, ImportValidationError,
    PersistenceWarning, StorageQuotaExceeded,
};
