use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

pub const GENERATION_FAILED_NOTICE: &str =
    "Something went wrong while bringing your file to life. Please try again.";
pub const INVALID_IMPORT_NOTICE: &str = "Invalid creation file format.";
pub const IMPORT_FAILED_NOTICE: &str = "Failed to import creation.";

/// Uploaded media could not be turned into a payload the generation
/// service accepts.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("failed to decode '{mime_type}' upload as an image: {source}")]
    Decode {
        mime_type: String,
        #[source]
        source: BoxedError,
    },
    #[error("failed to re-encode upload as PNG: {0}")]
    Encode(#[source] BoxedError),
    #[error("media conversion task aborted: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("generation provider '{provider}' failed: {source}")]
    Remote {
        provider: String,
        #[source]
        source: BoxedError,
    },
    #[error("unknown generation provider '{0}'")]
    UnknownProvider(String),
}

impl GenerationError {
    pub fn notice(&self) -> &'static str {
        GENERATION_FAILED_NOTICE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreationSchemaError {
    #[error("creation record must be a JSON object")]
    NotAnObject,
    #[error("creation record is missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum ImportValidationError {
    #[error("import payload is not valid creation JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] CreationSchemaError),
}

impl ImportValidationError {
    /// Message shown to the user when an import is rejected.
    pub fn notice(&self) -> &'static str {
        match self {
            Self::Malformed(_) => IMPORT_FAILED_NOTICE,
            Self::Schema(_) => INVALID_IMPORT_NOTICE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("storage quota exceeded ({required} bytes needed, {quota} allowed)")]
pub struct StorageQuotaExceeded {
    pub required: usize,
    pub quota: usize,
}

/// Non-fatal storage failure. Logged, never surfaced to the user.
#[derive(Debug, Error)]
pub enum PersistenceWarning {
    #[error("persisted history is unreadable: {0}")]
    Read(#[source] BoxedError),
    #[error("failed to serialize creation history: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    QuotaExceeded(#[from] StorageQuotaExceeded),
    #[error("failed to write creation history: {0}")]
    Write(#[source] BoxedError),
}

impl PersistenceWarning {
    pub fn from_write(err: anyhow::Error) -> Self {
        match err.downcast::<StorageQuotaExceeded>() {
            Ok(quota) => Self::QuotaExceeded(quota),
            Err(other) => Self::Write(other.into()),
        }
    }
}
