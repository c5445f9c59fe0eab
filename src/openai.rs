//! OpenAI API client: Whisper transcription, chat completions, speech synthesis.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pipeline::SpeechBackend;

/// Upper bound for any single API call. A stuck remote call surfaces as
/// `Error::Http` instead of stalling the invocation forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Model identifiers for the three API surfaces, taken from config.
pub struct Models {
    pub chat: String,
    pub transcription: String,
    pub speech: String,
    pub voice: String,
}

pub struct Client {
    api_key: String,
    models: Models,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

impl Client {
    pub fn new(api_key: String, models: Models) -> Self {
        Self {
            api_key,
            models,
            http: reqwest::Client::new(),
        }
    }
}

impl SpeechBackend for Client {
    /// Transcribe an OGG Opus voice clip to text via the Whisper API.
    async fn transcribe(&self, ogg_data: &[u8]) -> Result<String, Error> {
        debug!("Transcribing {} bytes of audio", ogg_data.len());

        let part = reqwest::multipart::Part::bytes(ogg_data.to_vec())
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| Error::Http(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.models.transcription.clone())
            .text("response_format", "text")
            .part("file", part);

        let response = self
            .http
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?
            .trim()
            .to_string();

        info!("Transcribed: \"{}\"", truncate(&text, 100));
        Ok(text)
    }

    /// Run a single-turn chat completion. The prompt is sent as one
    /// user-role message with no history and no system prompt.
    async fn complete(&self, prompt: &str) -> Result<String, Error> {
        let request = ChatRequest {
            model: &self.models.chat,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        first_choice(chat_response)
    }

    /// Synthesize speech from text. Returns the raw encoded audio bytes
    /// in the format implied by the configured speech model (MP3 for tts-1).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, Error> {
        info!("TTS: \"{}\"", truncate(text, 50));

        let request = SpeechRequest {
            model: &self.models.speech,
            voice: &self.models.voice,
            input: text,
        };

        let response = self
            .http
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        debug!("Got {} bytes of synthesized audio", audio.len());
        Ok(audio.to_vec())
    }
}

fn first_choice(response: ChatResponse) -> Result<String, Error> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(Error::Empty)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}
