//! Ordered provider fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{SpeechProvider, SpeechRequest};
use crate::error::{ProviderError, SpeechError, SpeechResult};

/// Narration written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSpeech {
    pub path: PathBuf,
    /// Name of the provider that produced it
    pub provider: String,
}

/// Tries providers in order until one returns audio.
///
/// A failing provider is logged and skipped, never retried; whole-job retries
/// belong to the job manager.
#[derive(Clone)]
pub struct SpeechSynthesizer {
    providers: Vec<Arc<dyn SpeechProvider>>,
    timeout: Duration,
}

impl SpeechSynthesizer {
    pub fn new(providers: Vec<Arc<dyn SpeechProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Synthesize `request` into `output_stem` plus the provider's extension.
    pub async fn synthesize(
        &self,
        request: &SpeechRequest,
        output_stem: &Path,
    ) -> SpeechResult<SynthesizedSpeech> {
        let mut last: Option<(String, ProviderError)> = None;

        for provider in &self.providers {
            let name = provider.name().to_string();
            debug!(provider = %name, chars = request.text.len(), "Requesting speech");

            match self.call(provider.as_ref(), request).await {
                Ok(bytes) => {
                    let path = output_stem.with_extension(provider.audio_format().extension());
                    tokio::fs::write(&path, &bytes).await?;
                    info!(provider = %name, bytes = bytes.len(), "Speech synthesized");
                    return Ok(SynthesizedSpeech { path, provider: name });
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Speech provider failed, trying next");
                    metrics::counter!("reel_speech_provider_failures_total", "provider" => name.clone())
                        .increment(1);
                    last = Some((name, e));
                }
            }
        }

        match last {
            Some((provider, last)) => Err(SpeechError::AllProvidersFailed {
                attempts: self.providers.len(),
                provider,
                last,
            }),
            None => Err(SpeechError::NoProviders),
        }
    }

    async fn call(&self, provider: &dyn SpeechProvider, request: &SpeechRequest) -> Result<Vec<u8>, ProviderError> {
        let bytes = tokio::time::timeout(self.timeout, provider.synthesize(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))??;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidResponse("empty audio payload".to_string()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::AudioFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed(&'static [u8]),
        Fail(fn() -> ProviderError),
        Hang,
    }

    struct FakeProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SpeechProvider for FakeProvider {
        async fn synthesize(&self, _request: &SpeechRequest) -> Result<Vec<u8>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed(bytes) => Ok(bytes.to_vec()),
                Behavior::Fail(make) => Err(make()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn audio_format(&self) -> AudioFormat {
            AudioFormat::Wav
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn request() -> SpeechRequest {
        SpeechRequest::new("Hello there.", "en")
    }

    #[tokio::test]
    async fn test_last_provider_wins_after_failures() {
        let dir = tempfile::tempdir().unwrap();
        let first = FakeProvider::new("cloud", Behavior::Fail(|| ProviderError::Unauthorized("bad key".into())));
        let second = FakeProvider::new(
            "backup",
            Behavior::Fail(|| ProviderError::ServerError { status: 503, body: "down".into() }),
        );
        let third = FakeProvider::new("local", Behavior::Succeed(b"RIFFdata"));

        let synth = SpeechSynthesizer::new(
            vec![first.clone(), second.clone(), third.clone()],
            Duration::from_secs(5),
        );
        let speech = synth.synthesize(&request(), &dir.path().join("voice_0000")).await.unwrap();

        assert_eq!(speech.provider, "local");
        assert_eq!(speech.path, dir.path().join("voice_0000.wav"));
        assert_eq!(std::fs::read(&speech.path).unwrap(), b"RIFFdata");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_success_stops_chain() {
        let dir = tempfile::tempdir().unwrap();
        let first = FakeProvider::new("cloud", Behavior::Succeed(b"ID3"));
        let second = FakeProvider::new("local", Behavior::Succeed(b"RIFF"));
        let synth = SpeechSynthesizer::new(vec![first, second.clone()], Duration::from_secs(5));

        let speech = synth.synthesize(&request(), &dir.path().join("v")).await.unwrap();
        assert_eq!(speech.provider, "cloud");
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_fail_wraps_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SpeechSynthesizer::new(
            vec![
                FakeProvider::new("cloud", Behavior::Fail(|| ProviderError::RateLimited("429".into()))),
                FakeProvider::new("local", Behavior::Fail(|| ProviderError::Unavailable("espeak-ng missing".into()))),
            ],
            Duration::from_secs(5),
        );

        let err = synth.synthesize(&request(), &dir.path().join("v")).await.unwrap_err();
        match err {
            SpeechError::AllProvidersFailed { attempts, provider, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(provider, "local");
                assert!(matches!(last, ProviderError::Unavailable(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_timeout_advances_to_next_provider() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SpeechSynthesizer::new(
            vec![
                FakeProvider::new("slow", Behavior::Hang),
                FakeProvider::new("fast", Behavior::Succeed(b"RIFF")),
            ],
            Duration::from_millis(50),
        );
        let speech = synth.synthesize(&request(), &dir.path().join("v")).await.unwrap();
        assert_eq!(speech.provider, "fast");
    }

    #[tokio::test]
    async fn test_empty_payload_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SpeechSynthesizer::new(
            vec![FakeProvider::new("silent", Behavior::Succeed(b""))],
            Duration::from_secs(1),
        );
        let err = synth.synthesize(&request(), &dir.path().join("v")).await.unwrap_err();
        assert!(matches!(
            err,
            SpeechError::AllProvidersFailed { last: ProviderError::InvalidResponse(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_no_providers() {
        let dir = tempfile::tempdir().unwrap();
        let synth = SpeechSynthesizer::new(Vec::new(), Duration::from_secs(1));
        assert!(matches!(
            synth.synthesize(&request(), &dir.path().join("v")).await,
            Err(SpeechError::NoProviders)
        ));
    }
}
