use crate::error::{CallrelayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Text-to-speech backend.
///
/// Implementations may be called concurrently from many tasks and must not
/// assume anything about the order in which calls complete.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into encoded audio ready for the outbound stream.
    async fn synthesize(&self, text: &str) -> Result<Bytes>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Mock synthesizer for testing
///
/// Returns the UTF-8 bytes of the input text as "audio", so emitted payloads
/// can be compared against the segment text.
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    failures: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay the response for segments containing `text`.
    pub fn with_delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    /// Delay every response not matched by [`with_delay`](Self::with_delay).
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Fail segments containing `text`.
    pub fn with_failure(mut self, text: &str) -> Self {
        self.failures.push(text.to_string());
        self
    }

    /// Number of synthesize calls made so far, across clones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn delay_for(&self, text: &str) -> Duration {
        self.delays
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, delay)| *delay)
            .unwrap_or(self.default_delay)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_for(text);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failures.iter().any(|needle| text.contains(needle.as_str())) {
            return Err(CallrelayError::Synthesis {
                message: format!("mock synthesis failure for {:?}", text),
            });
        }

        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(feature = "http-backends")]
pub use http::HttpSynthesizer;

#[cfg(feature = "http-backends")]
mod http {
    use super::SpeechSynthesizer;
    use crate::config::TtsConfig;
    use crate::error::{CallrelayError, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct SynthesisRequest<'a> {
        text: &'a str,
        voice_model: &'a str,
        format: &'a str,
    }

    /// Synthesizer backed by an HTTP text-to-speech endpoint.
    ///
    /// Posts `{text, voice_model, format}` as JSON and treats the response
    /// body as the encoded audio.
    pub struct HttpSynthesizer {
        client: reqwest::Client,
        url: String,
        api_key: String,
        voice: String,
        format: String,
    }

    impl HttpSynthesizer {
        pub fn new(config: &TtsConfig, api_key: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                url: config.url.clone(),
                api_key: api_key.into(),
                voice: config.voice.clone(),
                format: config.format.clone(),
            }
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for HttpSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<Bytes> {
            let body = SynthesisRequest {
                text,
                voice_model: &self.voice,
                format: &self.format,
            };

            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| CallrelayError::Synthesis {
                    message: format!("request failed: {}", e),
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(CallrelayError::Synthesis {
                    message: format!("API returned {}: {}", status, body),
                });
            }

            let audio = response.bytes().await.map_err(|e| CallrelayError::Synthesis {
                message: format!("failed to read audio: {}", e),
            })?;

            if audio.is_empty() {
                return Err(CallrelayError::Synthesis {
                    message: "API returned empty audio".to_string(),
                });
            }
            Ok(audio)
        }

        fn name(&self) -> &str {
            "http"
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_text_bytes() {
        let synthesizer = MockSynthesizer::new();
        let audio = synthesizer.synthesize("Hello").await.unwrap();
        assert_eq!(&audio[..], b"Hello");
        assert_eq!(synthesizer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_matches_substring() {
        let synthesizer = MockSynthesizer::new().with_failure("balance");
        let err = synthesizer
            .synthesize("Your balance is 42")
            .await
            .unwrap_err();
        assert!(matches!(err, CallrelayError::Synthesis { .. }));
        assert!(synthesizer.synthesize("Goodbye").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_delay() {
        let synthesizer = MockSynthesizer::new().with_delay("slow", Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        synthesizer.synthesize("fast").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(1));

        synthesizer.synthesize("slow one").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_call_count_shared_across_clones() {
        let synthesizer = MockSynthesizer::new();
        let clone = synthesizer.clone();
        clone.synthesize("a").await.unwrap();
        synthesizer.synthesize("b").await.unwrap();
        assert_eq!(synthesizer.call_count(), 2);
    }

    #[test]
    fn test_synthesizer_trait_is_object_safe() {
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(MockSynthesizer::new());
        assert_eq!(synthesizer.name(), "mock");
    }
}
