use std::sync::Arc;
use std::time::Instant;

use lifelike_contracts::{Creation, GenerationError};

use crate::media::{normalize, UploadedFile};
use crate::providers::{GenerationProvider, GenerationProviderRegistry, GenerationRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Created(Creation),
    /// The provider answered without an artifact.
    NoArtifact,
    /// Neither prompt text nor a file was given; nothing was requested.
    EmptySubmission,
}

impl GenerationOutcome {
    pub fn creation(&self) -> Option<&Creation> {
        match self {
            Self::Created(creation) => Some(creation),
            _ => None,
        }
    }
}

/// Runs one generation attempt: normalize the upload, call the provider,
/// and build the resulting [`Creation`]. Holds no session state; the caller
/// owns the generating/active transitions.
#[derive(Clone)]
pub struct GenerationCoordinator {
    provider: Arc<dyn GenerationProvider>,
}

impl GenerationCoordinator {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }

    pub fn from_registry(
        registry: &GenerationProviderRegistry,
        name: &str,
    ) -> Result<Self, GenerationError> {
        registry
            .get(name)
            .map(Self::new)
            .ok_or_else(|| GenerationError::UnknownProvider(name.to_string()))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn generate(
        &self,
        prompt: &str,
        file: Option<&UploadedFile>,
    ) -> Result<GenerationOutcome, GenerationError> {
        if prompt.trim().is_empty() && file.is_none() {
            tracing::debug!("ignoring empty submission");
            return Ok(GenerationOutcome::EmptySubmission);
        }

        let media = match file {
            Some(file) => Some(normalize(file).await?),
            None => None,
        };
        // Rebuilt from the normalized payload: the MIME type may have changed.
        let original_image = media.as_ref().map(|media| media.data_uri());

        let request = GenerationRequest {
            prompt: prompt.to_string(),
            media,
        };
        let started = Instant::now();
        let html = self
            .provider
            .generate(&request)
            .await
            .map_err(|err| GenerationError::Remote {
                provider: self.provider.name().to_string(),
                source: err.into(),
            })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Some(html) = html.filter(|html| !html.trim().is_empty()) else {
            tracing::info!(provider = self.provider.name(), elapsed_ms, "provider returned no artifact");
            return Ok(GenerationOutcome::NoArtifact);
        };

        let name = Creation::derive_name(file.map(|file| file.name.as_str()), prompt);
        let creation = Creation::new(name, html, original_image);
        tracing::info!(
            provider = self.provider.name(),
            creation_id = %creation.id,
            html_bytes = creation.html.len(),
            elapsed_ms,
            "creation generated"
        );
        Ok(GenerationOutcome::Created(creation))
    }
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use image::{ImageFormat, RgbImage};
    use lifelike_contracts::{GenerationError, SourceKind};

    use super::testing::ScriptedProvider;
    use super::{GenerationCoordinator, GenerationOutcome};
    use crate::media::UploadedFile;
    use crate::providers::default_provider_registry;
    use lifelike_contracts::config::Settings;

    fn bmp_upload(name: &str) -> anyhow::Result<UploadedFile> {
        let mut bytes = Vec::new();
        RgbImage::new(4, 4).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Bmp)?;
        Ok(UploadedFile::new(name, "image/bmp", bytes))
    }

    #[tokio::test]
    async fn text_only_prompt_names_creation_after_prompt() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::html("<p>calc</p>"));
        let coordinator = GenerationCoordinator::new(provider.clone());

        let outcome = coordinator.generate("a calculator", None).await?;
        let creation = outcome.creation().cloned().unwrap_or_else(|| panic!("no creation"));
        assert_eq!(creation.name, "a calculator");
        assert_eq!(creation.html, "<p>calc</p>");
        assert_eq!(creation.original_image, None);
        assert_eq!(creation.source_kind(), SourceKind::None);

        let requests = provider.requests.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].media, None);
        Ok(())
    }

    #[tokio::test]
    async fn bmp_upload_is_sent_and_stored_as_png() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::html("<canvas></canvas>"));
        let coordinator = GenerationCoordinator::new(provider.clone());

        let outcome = coordinator.generate("", Some(&bmp_upload("sketch.bmp")?)).await?;
        let creation = outcome.creation().cloned().unwrap_or_else(|| panic!("no creation"));
        assert_eq!(creation.name, "sketch.bmp");
        let original = creation.original_image.clone().unwrap_or_default();
        assert!(original.starts_with("data:image/png;base64,"));

        let requests = provider.requests.lock().map(|rows| rows.clone()).unwrap_or_default();
        let media = requests[0].media.clone().unwrap_or_else(|| panic!("no media"));
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(original, media.data_uri());
        Ok(())
    }

    #[tokio::test]
    async fn empty_submission_never_reaches_provider() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::html("<p>unused</p>"));
        let coordinator = GenerationCoordinator::new(provider.clone());

        assert_eq!(
            coordinator.generate("", None).await?,
            GenerationOutcome::EmptySubmission
        );
        assert_eq!(
            coordinator.generate("   ", None).await?,
            GenerationOutcome::EmptySubmission
        );
        assert_eq!(provider.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn blank_provider_output_is_not_a_creation() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(Some("  ".to_string())), Ok(None)]));
        let coordinator = GenerationCoordinator::new(provider);
        assert_eq!(coordinator.generate("x", None).await?, GenerationOutcome::NoArtifact);
        assert_eq!(coordinator.generate("x", None).await?, GenerationOutcome::NoArtifact);
        Ok(())
    }

    #[tokio::test]
    async fn provider_and_conversion_failures_become_generation_errors() -> anyhow::Result<()> {
        let provider = Arc::new(ScriptedProvider::failing("quota exhausted"));
        let coordinator = GenerationCoordinator::new(provider.clone());
        let err = coordinator.generate("x", None).await.err();
        assert!(matches!(
            err,
            Some(GenerationError::Remote { ref provider, .. }) if provider == "scripted"
        ));

        let broken = UploadedFile::new("broken.tiff", "image/tiff", b"nope".to_vec());
        let err = coordinator.generate("x", Some(&broken)).await.err();
        assert!(matches!(err, Some(GenerationError::Conversion(_))));
        assert_eq!(provider.call_count(), 1);
        Ok(())
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let registry = default_provider_registry(&Settings::default());
        let coordinator = GenerationCoordinator::from_registry(&registry, "dryrun");
        assert_eq!(
            coordinator.as_ref().map(|value| value.provider_name()).ok(),
            Some("dryrun")
        );
        assert!(matches!(
            GenerationCoordinator::from_registry(&registry, "nope").err(),
            Some(GenerationError::UnknownProvider(name)) if name == "nope"
        ));
    }
}
