use lifelike_contracts::events::{EventPayload, EventWriter, SessionEvent};
use lifelike_contracts::{Creation, GenerationError, ImportValidationError};
use serde_json::{json, Value};

use crate::generation::{GenerationCoordinator, GenerationOutcome};
use crate::media::UploadedFile;
use crate::store::CreationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Generating,
    Focused,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Focused => "focused",
        }
    }
}

/// Read-only snapshot used to decide what to render.
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub status: SessionStatus,
    pub active: Option<&'a Creation>,
    /// The input surface is hidden while generating or viewing a creation.
    pub is_focused: bool,
    pub notice: Option<&'a str>,
    pub history: &'a [Creation],
}

/// Handed out by [`SessionState::begin_generation`]. Only the ticket with
/// the latest token may change session state when it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTicket {
    token: u64,
    pub prompt: String,
    pub file: Option<UploadedFile>,
}

impl GenerationTicket {
    pub fn token(&self) -> u64 {
        self.token
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationUpdate {
    /// Empty submission; nothing happened.
    Ignored,
    Activated(Creation),
    NoArtifact,
    Failed { notice: String },
    /// A newer request, a reset or a selection superseded this one.
    Discarded,
}

/// Idle / Generating / Focused state machine for one user session.
///
/// Every new request, reset and selection bumps a request token. A
/// generation result is applied only if it carries the current token, so a
/// late completion can never overwrite a reset or a newer result.
pub struct SessionState {
    coordinator: GenerationCoordinator,
    store: CreationStore,
    events: Option<EventWriter>,
    active: Option<Creation>,
    generating: bool,
    current_token: u64,
    notice: Option<String>,
}

impl SessionState {
    pub fn new(coordinator: GenerationCoordinator, store: CreationStore) -> Self {
        Self {
            coordinator,
            store,
            events: None,
            active: None,
            generating: false,
            current_token: 0,
            notice: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Loads history and opens the journal for this session.
    pub async fn start(&mut self) -> &[Creation] {
        let count = self.store.load_initial().await.len();
        self.record(
            SessionEvent::SessionStarted,
            [
                ("provider", json!(self.coordinator.provider_name())),
                ("history_count", json!(count)),
            ],
        );
        self.store.history()
    }

    pub fn status(&self) -> SessionStatus {
        if self.generating {
            SessionStatus::Generating
        } else if self.active.is_some() {
            SessionStatus::Focused
        } else {
            SessionStatus::Idle
        }
    }

    pub fn is_focused(&self) -> bool {
        self.generating || self.active.is_some()
    }

    pub fn active(&self) -> Option<&Creation> {
        self.active.as_ref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    pub fn history(&self) -> &[Creation] {
        self.store.history()
    }

    pub fn store(&self) -> &CreationStore {
        &self.store
    }

    /// Cheap handle for running a ticket outside the session borrow.
    pub fn coordinator(&self) -> GenerationCoordinator {
        self.coordinator.clone()
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            status: self.status(),
            active: self.active.as_ref(),
            is_focused: self.is_focused(),
            notice: self.notice.as_deref(),
            history: self.store.history(),
        }
    }

    /// Enters Generating and clears the active creation. Returns `None`, and
    /// changes nothing, when both the prompt and the file are empty.
    pub fn begin_generation(
        &mut self,
        prompt: &str,
        file: Option<UploadedFile>,
    ) -> Option<GenerationTicket> {
        if prompt.trim().is_empty() && file.is_none() {
            return None;
        }
        let token = self.next_token();
        self.generating = true;
        self.active = None;
        self.notice = None;
        self.record(
            SessionEvent::GenerationStarted,
            [
                ("token", json!(token)),
                ("prompt_chars", json!(prompt.chars().count())),
                ("file", json!(file.as_ref().map(|file| file.name.clone()))),
            ],
        );
        Some(GenerationTicket {
            token,
            prompt: prompt.to_string(),
            file,
        })
    }

    pub async fn finish_generation(
        &mut self,
        token: u64,
        result: Result<GenerationOutcome, GenerationError>,
    ) -> GenerationUpdate {
        if token != self.current_token || !self.generating {
            tracing::info!(token, current = self.current_token, "discarding superseded generation");
            self.record(
                SessionEvent::GenerationDiscarded,
                [("token", json!(token)), ("current_token", json!(self.current_token))],
            );
            return GenerationUpdate::Discarded;
        }
        self.generating = false;

        match result {
            Ok(GenerationOutcome::Created(creation)) => {
                self.active = Some(creation.clone());
                self.store.append(creation.clone()).await;
                self.record(
                    SessionEvent::CreationCreated,
                    [
                        ("token", json!(token)),
                        ("creation_id", json!(creation.id)),
                        ("name", json!(creation.name)),
                    ],
                );
                GenerationUpdate::Activated(creation)
            }
            Ok(GenerationOutcome::NoArtifact) => {
                self.record(SessionEvent::GenerationEmpty, [("token", json!(token))]);
                GenerationUpdate::NoArtifact
            }
            Ok(GenerationOutcome::EmptySubmission) => GenerationUpdate::Ignored,
            Err(err) => {
                tracing::error!(error = %err, "generation failed");
                self.record(
                    SessionEvent::GenerationFailed,
                    [("token", json!(token)), ("error", json!(err.to_string()))],
                );
                let notice = err.notice().to_string();
                self.notice = Some(notice.clone());
                GenerationUpdate::Failed { notice }
            }
        }
    }

    /// Begins, runs and finishes one generation in sequence.
    pub async fn submit(&mut self, prompt: &str, file: Option<UploadedFile>) -> GenerationUpdate {
        let Some(ticket) = self.begin_generation(prompt, file) else {
            return GenerationUpdate::Ignored;
        };
        let result = self
            .coordinator
            .generate(&ticket.prompt, ticket.file.as_ref())
            .await;
        self.finish_generation(ticket.token, result).await
    }

    /// Back to Idle. Any in-flight generation is abandoned.
    pub fn reset(&mut self) {
        self.next_token();
        self.generating = false;
        self.active = None;
        self.notice = None;
        self.record(SessionEvent::SessionReset, []);
    }

    /// Focuses a creation already in history. Returns false for unknown ids.
    pub fn select_from_history(&mut self, id: &str) -> bool {
        let Some(creation) = self.store.get(id).cloned() else {
            return false;
        };
        self.abandon_generation();
        self.record(
            SessionEvent::CreationSelected,
            [("creation_id", json!(creation.id)), ("name", json!(creation.name))],
        );
        self.active = Some(creation);
        self.notice = None;
        true
    }

    /// Validates and imports a creation file, then focuses it. On failure the
    /// user-facing notice is set and history and focus stay as they were.
    pub async fn import(&mut self, raw_json: &str) -> Result<Creation, ImportValidationError> {
        match self.store.import_from(raw_json).await {
            Ok(imported) => {
                self.abandon_generation();
                self.record(
                    SessionEvent::CreationImported,
                    [
                        ("creation_id", json!(imported.creation.id)),
                        ("inserted", json!(imported.inserted)),
                    ],
                );
                self.active = Some(imported.creation.clone());
                self.notice = None;
                Ok(imported.creation)
            }
            Err(err) => {
                tracing::warn!(error = %err, "import rejected");
                self.record(SessionEvent::ImportRejected, [("error", json!(err.to_string()))]);
                self.notice = Some(err.notice().to_string());
                Err(err)
            }
        }
    }

    fn abandon_generation(&mut self) {
        if self.generating {
            self.next_token();
            self.generating = false;
        }
    }

    fn next_token(&mut self) -> u64 {
        self.current_token += 1;
        self.current_token
    }

    fn record<const N: usize>(&self, event: SessionEvent, fields: [(&str, Value); N]) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        events.record(event, payload);
    }
}
