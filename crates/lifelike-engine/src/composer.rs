use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::UploadedFile;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Please upload an image or PDF.")]
pub struct UnsupportedUpload {
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictationEvent {
    Started,
    UtteranceCompleted(String),
    Ended,
}

/// Speech input that reports one completed utterance per session.
pub trait Dictation: Send {
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self);
    fn is_listening(&self) -> bool;
}

/// Dictation fed by typed text instead of a microphone. Each call to
/// [`Self::hear`] while listening completes one utterance and ends the
/// listening session.
pub struct ManualDictation {
    listening: bool,
    events: mpsc::UnboundedSender<DictationEvent>,
}

impl ManualDictation {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DictationEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                listening: false,
                events,
            },
            receiver,
        )
    }

    /// Returns false when not listening; the text is dropped.
    pub fn hear(&mut self, text: &str) -> bool {
        if !self.listening {
            return false;
        }
        let _ = self
            .events
            .send(DictationEvent::UtteranceCompleted(text.to_string()));
        self.stop();
        true
    }
}

impl Dictation for ManualDictation {
    fn start(&mut self) -> anyhow::Result<()> {
        if self.listening {
            return Ok(());
        }
        self.events
            .send(DictationEvent::Started)
            .map_err(|_| anyhow::anyhow!("dictation listener dropped"))?;
        self.listening = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.listening {
            self.listening = false;
            let _ = self.events.send(DictationEvent::Ended);
        }
    }

    fn is_listening(&self) -> bool {
        self.listening
    }
}

/// Prompt text and the optional file waiting to be submitted.
#[derive(Debug, Default)]
pub struct InputComposer {
    prompt: String,
    file: Option<UploadedFile>,
    listening: bool,
}

impl InputComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn file(&self) -> Option<&UploadedFile> {
        self.file.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Replaces the pending file. Anything other than an image or a PDF is
    /// rejected and the previous selection is kept.
    pub fn select_file(&mut self, file: UploadedFile) -> Result<(), UnsupportedUpload> {
        if !file.is_accepted() {
            return Err(UnsupportedUpload {
                file_name: file.name,
                mime_type: file.mime_type,
            });
        }
        self.file = Some(file);
        Ok(())
    }

    pub fn append_utterance(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.prompt.is_empty() {
            self.prompt = text.to_string();
        } else {
            self.prompt = format!("{} {}", self.prompt, text);
        }
    }

    pub fn apply(&mut self, event: DictationEvent) {
        match event {
            DictationEvent::Started => self.listening = true,
            DictationEvent::UtteranceCompleted(text) => self.append_utterance(&text),
            DictationEvent::Ended => self.listening = false,
        }
    }

    pub fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<DictationEvent>) {
        while let Ok(event) = events.try_recv() {
            self.apply(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt.trim().is_empty() && self.file.is_none()
    }

    /// Hands out the pending prompt and file and clears both. `None` when
    /// there is nothing to submit.
    pub fn take_submission(&mut self) -> Option<(String, Option<UploadedFile>)> {
        if self.is_empty() {
            return None;
        }
        Some((std::mem::take(&mut self.prompt), self.file.take()))
    }

    pub fn clear(&mut self) {
        self.prompt.clear();
        self.file = None;
    }
}
