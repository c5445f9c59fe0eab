//! Voice pipeline - turns one voice attachment into one spoken reply.
//!
//! Fixed four-step sequence: fetch audio, transcribe, generate a reply,
//! synthesize and deliver. The transcript is echoed back to the user before
//! the reply is generated, so the user sees progress mid-pipeline.

use std::future::Future;

use tracing::{info, warn};

use crate::openai;

/// Greeting sent in response to /start.
pub const GREETING: &str =
    "Привет! Отправь мне голосовое сообщение, и я преобразую его в текст, отвечу и озвучу ответ.";

/// Label prepended to the transcript echo.
pub const TRANSCRIPT_PREFIX: &str = "Распознанный текст: ";

/// Reply substituted when the completion service fails. The raw fault detail
/// is logged, never shown to the user.
pub const COMPLETION_FALLBACK: &str = "Произошла ошибка при получении ответа.";

/// Messaging transport operations the pipeline needs.
pub trait ChatTransport {
    fn download_voice(
        &self,
        file_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<i64, String>> + Send;

    fn send_voice(
        &self,
        chat_id: i64,
        voice_data: Vec<u8>,
    ) -> impl Future<Output = Result<i64, String>> + Send;
}

/// Speech and completion backend operations the pipeline needs.
pub trait SpeechBackend {
    fn transcribe(
        &self,
        ogg_data: &[u8],
    ) -> impl Future<Output = Result<String, openai::Error>> + Send;

    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, openai::Error>> + Send;

    fn synthesize(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Vec<u8>, openai::Error>> + Send;
}

/// A pipeline failure. Each variant names the step that failed; the
/// completion step is absent because its failure is recovered inline
/// with [`COMPLETION_FALLBACK`].
#[derive(Debug)]
pub enum PipelineError {
    Fetch(String),
    Transcribe(String),
    Synthesize(String),
    Deliver(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "voice fetch failed: {e}"),
            Self::Transcribe(e) => write!(f, "transcription failed: {e}"),
            Self::Synthesize(e) => write!(f, "speech synthesis failed: {e}"),
            Self::Deliver(e) => write!(f, "delivery failed: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Run the voice pipeline for one incoming voice message.
///
/// Outbound sequence on success: transcript echo, reply text, voice message.
/// Nothing is sent if fetching or transcription fails.
pub async fn run_voice_pipeline<T, S>(
    transport: &T,
    speech: &S,
    chat_id: i64,
    voice_file_id: &str,
) -> Result<(), PipelineError>
where
    T: ChatTransport,
    S: SpeechBackend,
{
    let audio = transport
        .download_voice(voice_file_id)
        .await
        .map_err(PipelineError::Fetch)?;

    let transcript = speech
        .transcribe(&audio)
        .await
        .map_err(|e| PipelineError::Transcribe(e.to_string()))?;

    transport
        .send_message(chat_id, &format!("{TRANSCRIPT_PREFIX}{transcript}"))
        .await
        .map_err(PipelineError::Deliver)?;

    // The completion step is the only recovered failure: the user gets a
    // fixed fallback reply, spoken like any other reply.
    let reply = match speech.complete(&transcript).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Completion failed, substituting fallback: {e}");
            COMPLETION_FALLBACK.to_string()
        }
    };

    transport
        .send_message(chat_id, &reply)
        .await
        .map_err(PipelineError::Deliver)?;

    let voice = speech
        .synthesize(&reply)
        .await
        .map_err(|e| PipelineError::Synthesize(e.to_string()))?;

    transport
        .send_voice(chat_id, voice)
        .await
        .map_err(PipelineError::Deliver)?;

    info!("Voice pipeline completed for chat {}", chat_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// What a mock transport saw go out.
    #[derive(Debug, Clone, PartialEq)]
    enum Outbound {
        Text(String),
        Voice(Vec<u8>),
    }

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<Outbound>>,
        fail_download: bool,
    }

    impl MockTransport {
        fn sent(&self) -> Vec<Outbound> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl ChatTransport for MockTransport {
        async fn download_voice(&self, file_id: &str) -> Result<Vec<u8>, String> {
            if self.fail_download {
                return Err("file not found".to_string());
            }
            Ok(file_id.as_bytes().to_vec())
        }

        async fn send_message(&self, _chat_id: i64, text: &str) -> Result<i64, String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Outbound::Text(text.to_string()));
            Ok(sent.len() as i64)
        }

        async fn send_voice(&self, _chat_id: i64, voice_data: Vec<u8>) -> Result<i64, String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Outbound::Voice(voice_data));
            Ok(sent.len() as i64)
        }
    }

    /// Mock backend: transcribes bytes as UTF-8, replies with "re: {prompt}",
    /// synthesizes text as its bytes. Each step can be failed independently.
    #[derive(Default)]
    struct MockSpeech {
        fail_transcribe: bool,
        fail_complete: bool,
        fail_synthesize: bool,
    }

    impl SpeechBackend for MockSpeech {
        async fn transcribe(&self, ogg_data: &[u8]) -> Result<String, openai::Error> {
            if self.fail_transcribe {
                return Err(openai::Error::Api("400: bad audio".to_string()));
            }
            Ok(String::from_utf8_lossy(ogg_data).to_string())
        }

        async fn complete(&self, prompt: &str) -> Result<String, openai::Error> {
            if self.fail_complete {
                return Err(openai::Error::Api("500: run failed".to_string()));
            }
            Ok(format!("re: {prompt}"))
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, openai::Error> {
            if self.fail_synthesize {
                return Err(openai::Error::Api("500: tts down".to_string()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn test_outbound_order_is_echo_reply_voice() {
        let transport = MockTransport::default();
        let speech = MockSpeech::default();

        run_voice_pipeline(&transport, &speech, 42, "Hello")
            .await
            .expect("pipeline should succeed");

        assert_eq!(
            transport.sent(),
            vec![
                Outbound::Text("Распознанный текст: Hello".to_string()),
                Outbound::Text("re: Hello".to_string()),
                Outbound::Voice(b"re: Hello".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_completion_failure_substitutes_fallback() {
        let transport = MockTransport::default();
        let speech = MockSpeech { fail_complete: true, ..Default::default() };

        run_voice_pipeline(&transport, &speech, 42, "Hello")
            .await
            .expect("fallback path should still deliver");

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        // Fallback text is delivered and synthesized, the raw fault never is.
        assert_eq!(sent[1], Outbound::Text(COMPLETION_FALLBACK.to_string()));
        assert_eq!(sent[2], Outbound::Voice(COMPLETION_FALLBACK.as_bytes().to_vec()));
    }

    #[tokio::test]
    async fn test_fetch_failure_sends_nothing() {
        let transport = MockTransport { fail_download: true, ..Default::default() };
        let speech = MockSpeech::default();

        let err = run_voice_pipeline(&transport, &speech, 42, "Hello")
            .await
            .expect_err("should fail");

        assert!(matches!(err, PipelineError::Fetch(_)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transcribe_failure_sends_nothing() {
        let transport = MockTransport::default();
        let speech = MockSpeech { fail_transcribe: true, ..Default::default() };

        let err = run_voice_pipeline(&transport, &speech, 42, "Hello")
            .await
            .expect_err("should fail");

        assert!(matches!(err, PipelineError::Transcribe(_)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_failure_after_texts() {
        let transport = MockTransport::default();
        let speech = MockSpeech { fail_synthesize: true, ..Default::default() };

        let err = run_voice_pipeline(&transport, &speech, 42, "Hello")
            .await
            .expect_err("should fail");

        assert!(matches!(err, PipelineError::Synthesize(_)));
        // Both texts went out; no voice followed.
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Outbound::Text(_)));
        assert!(matches!(sent[1], Outbound::Text(_)));
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_cross_audio() {
        let transport_a = MockTransport::default();
        let transport_b = MockTransport::default();
        let speech = MockSpeech::default();

        let (ra, rb) = tokio::join!(
            run_voice_pipeline(&transport_a, &speech, 1, "first message"),
            run_voice_pipeline(&transport_b, &speech, 2, "second message"),
        );
        ra.unwrap();
        rb.unwrap();

        // Each chat's voice bytes match its own reply, never the other's.
        assert_eq!(transport_a.sent()[2], Outbound::Voice(b"re: first message".to_vec()));
        assert_eq!(transport_b.sent()[2], Outbound::Voice(b"re: second message".to_vec()));
    }

    #[test]
    fn test_user_facing_strings_are_fixed() {
        assert_eq!(
            GREETING,
            "Привет! Отправь мне голосовое сообщение, и я преобразую его в текст, отвечу и озвучу ответ."
        );
        assert_eq!(TRANSCRIPT_PREFIX, "Распознанный текст: ");
        assert_eq!(COMPLETION_FALLBACK, "Произошла ошибка при получении ответа.");
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::Fetch("404".to_string());
        assert!(err.to_string().contains("voice fetch failed"));
        let err = PipelineError::Synthesize("boom".to_string());
        assert!(err.to_string().contains("speech synthesis"));
    }
}
