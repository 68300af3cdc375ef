pub mod composer;
pub mod generation;
pub mod media;
pub mod providers;
pub mod session;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use lifelike_contracts::config::Settings;
use lifelike_contracts::events::EventWriter;
use lifelike_contracts::GenerationError;

pub use composer::{Dictation, DictationEvent, InputComposer, ManualDictation, UnsupportedUpload};
pub use generation::{GenerationCoordinator, GenerationOutcome};
pub use media::{normalize, NormalizedMedia, UploadedFile};
pub use providers::{
    default_provider_registry, GenerationProvider, GenerationProviderRegistry, GenerationRequest,
};
pub use session::{GenerationTicket, GenerationUpdate, SessionState, SessionStatus, SessionView};
pub use store::{
    CreationStore, ExportedCreation, FileHistoryStorage, HistoryStorage, HttpSeedSource,
    ImportedCreation, MemoryHistoryStorage, SeedSource,
};

/// Wires a file-backed store, HTTP seeds and the configured provider into a
/// fresh session. History is not loaded until [`SessionState::start`].
pub fn open_session(
    settings: &Settings,
    events: Option<EventWriter>,
) -> Result<SessionState, GenerationError> {
    let registry = default_provider_registry(settings);
    let coordinator = GenerationCoordinator::from_registry(&registry, &settings.provider)?;
    let store = CreationStore::new(
        Arc::new(FileHistoryStorage::new(
            settings.storage_path(),
            settings.storage_quota_bytes,
        )),
        Arc::new(HttpSeedSource::new(Duration::from_secs_f64(
            settings.request_timeout_s,
        ))),
        settings.seed_urls.clone(),
    );
    let session = SessionState::new(coordinator, store);
    Ok(match events {
        Some(events) => session.with_events(events),
        None => session,
    })
}
