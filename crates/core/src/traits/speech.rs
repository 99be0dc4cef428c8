//! Speech processing traits
//!
//! Both traits front a plain HTTP microservice (spec §4.4); the trait
//! boundary exists so the coordinator and endpointer can be tested against
//! mocks instead of real network calls, and so a tenant's STT/TTS endpoint
//! URL can select between implementations without touching call logic.

use async_trait::async_trait;
use crate::error::Result;
use crate::transcript::TranscriptResult;

/// Speech-to-Text client interface.
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn SpeechToText> = Arc::new(HttpSttClient::new(config));
/// let result = stt.transcribe(&pcm_bytes, Some("en"), None).await?;
/// println!("Transcribed: {}", result.text);
/// ```
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Transcribe a buffer of 16-bit PCM audio. An empty `text` in the
    /// result is a valid, non-error outcome (spec §4.4).
    async fn transcribe(
        &self,
        pcm16: &[u8],
        language_hint: Option<&str>,
        decoding_prompt: Option<&str>,
    ) -> Result<TranscriptResult>;

    /// Name used in tracing spans and metrics labels.
    fn name(&self) -> &str;
}

/// Text-to-Speech client interface.
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    /// Synthesize shaped text to audio bytes plus the content-type header
    /// the service reported.
    async fn synthesize(&self, request: &TtsRequest) -> Result<TtsAudio>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice_id: String,
    pub rate: Option<f32>,
    pub language: Option<String>,
    pub sample_rate_hz: u32,
}

#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockStt {
        canned: TranscriptResult,
    }

    #[async_trait]
    impl SpeechToText for MockStt {
        async fn transcribe(
            &self,
            _pcm16: &[u8],
            _language_hint: Option<&str>,
            _decoding_prompt: Option<&str>,
        ) -> Result<TranscriptResult> {
            Ok(self.canned.clone())
        }

        fn name(&self) -> &str {
            "mock-stt"
        }
    }

    #[tokio::test]
    async fn mock_stt_returns_canned_result() {
        let stt = MockStt {
            canned: TranscriptResult {
                text: "what time do you close".into(),
                confidence: 0.9,
                is_final: true,
                words: vec![],
            },
        };
        let result = stt.transcribe(&[], Some("en"), None).await.unwrap();
        assert_eq!(result.text, "what time do you close");
    }

    struct MockTts;

    #[async_trait]
    impl TextToSpeech for MockTts {
        async fn synthesize(&self, request: &TtsRequest) -> Result<TtsAudio> {
            Ok(TtsAudio {
                bytes: request.text.as_bytes().to_vec(),
                content_type: "audio/wav".into(),
            })
        }

        fn name(&self) -> &str {
            "mock-tts"
        }
    }

    #[tokio::test]
    async fn mock_tts_echoes_text_as_bytes() {
        let tts = MockTts;
        let request = TtsRequest {
            text: "hello".into(),
            voice_id: "default".into(),
            rate: None,
            language: None,
            sample_rate_hz: 8000,
        };
        let audio = tts.synthesize(&request).await.unwrap();
        assert_eq!(audio.bytes, b"hello");
    }
}
