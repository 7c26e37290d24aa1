//! Google Speech-to-Text / Text-to-Speech pass-through.
//!
//! Thin forwards: audio travels base64 both ways and non-2xx responses
//! surface the provider's own error message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::errors::ApiError;

const STT_URL: &str = "https://speech.googleapis.com/v1/speech:recognize";
const TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Clone)]
pub struct SpeechClient {
    api_key: Option<String>,
    stt_url: String,
    tts_url: String,
    client: Client,
}

impl SpeechClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            stt_url: STT_URL.to_string(),
            tts_url: TTS_URL.to_string(),
            client: Client::new(),
        }
    }

    fn key(&self) -> Result<&str, ApiError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("speech API key is not configured".to_string()))
    }

    /// base64 audio in, transcript text out.
    pub async fn speech_to_text(
        &self,
        audio_base64: &str,
        language_code: &str,
    ) -> Result<String, ApiError> {
        let key = self.key()?;

        // Reject garbage before the round trip.
        BASE64
            .decode(audio_base64.trim())
            .map_err(|_| ApiError::BadRequest("audio is not valid base64".to_string()))?;

        let body = json!({
            "config": {
                "languageCode": language_code,
                "enableAutomaticPunctuation": true,
            },
            "audio": {"content": audio_base64.trim()},
        });

        let payload = self
            .post(&format!("{}?key={key}", self.stt_url), &body)
            .await?;

        let transcript = payload["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r["alternatives"][0]["transcript"].as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        Ok(transcript)
    }

    /// Text in, base64 audio out.
    pub async fn text_to_speech(
        &self,
        text: &str,
        voice_name: &str,
        language_code: &str,
    ) -> Result<String, ApiError> {
        let key = self.key()?;

        let body = json!({
            "input": {"text": text},
            "voice": {"languageCode": language_code, "name": voice_name},
            "audioConfig": {"audioEncoding": "MP3"},
        });

        let payload = self
            .post(&format!("{}?key={key}", self.tts_url), &body)
            .await?;

        payload["audioContent"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Upstream("provider returned no audio".to_string()))
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        let res = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let value: Option<Value> = serde_json::from_str(&text).ok();
            let message = value
                .as_ref()
                .and_then(|v| v["error"]["message"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("provider returned {status}"));
            return Err(ApiError::Upstream(message));
        }

        res.json().await.map_err(ApiError::upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_rejected_before_any_request() {
        let client = SpeechClient::new(None);
        let err = client.speech_to_text("aGVsbG8=", "en-US").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected_before_any_request() {
        let client = SpeechClient::new(Some("key".to_string()));
        let err = client
            .speech_to_text("not base64 at all!!!", "en-US")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
