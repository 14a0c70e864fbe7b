//! Gemini (Generative Language API) client.
//! Streams replies over SSE (`streamGenerateContent?alt=sse`) and keeps the chat history
//! so each turn is sent with the turns before it.

use crate::config::{Config, DEFAULT_BASE_URL};
use crate::llm::{ChatBackend, LlmError, SseDecoder};
use crate::media::Part;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Client for one Gemini chat session (model, persona, running history).
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
    history: Mutex<Vec<Content>>,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base_url: Option<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = model.into();
        let model = model.trim_start_matches("models/").to_string();
        Self {
            base_url,
            api_key: api_key.into(),
            model,
            system_instruction: None,
            history: Mutex::new(Vec::new()),
            client: reqwest::Client::new(),
        }
    }

    /// Client for the configured endpoint, model, and persona.
    pub fn from_config(config: &Config, api_key: impl Into<String>) -> Self {
        Self::new(
            Some(config.model.base_url.clone()),
            api_key,
            config.model.name.clone(),
        )
        .with_system_instruction(config.persona.system_instruction.clone())
    }

    /// Persona instruction sent with every request. Blank disables it.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.system_instruction = if instruction.trim().is_empty() {
            None
        } else {
            Some(instruction)
        };
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Completed turns so far (user and model, alternating).
    pub async fn history(&self) -> Vec<Content> {
        self.history.lock().await.clone()
    }

    /// GET /models — list available models, following page tokens.
    pub async fn list_models(&self) -> Result<Vec<GeminiModel>, LlmError> {
        let url = format!("{}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(&url)
                .header("x-goog-api-key", &self.api_key);
            if let Some(ref token) = page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let res = req.send().await?;
            if !res.status().is_success() {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                return Err(LlmError::Api(format!("{} {}", status, body)));
            }
            let data: ModelsResponse = res.json().await?;
            models.extend(data.models);
            match data.next_page_token.filter(|t| !t.is_empty()) {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }
        Ok(models)
    }
}

#[async_trait]
impl ChatBackend for GeminiClient {
    /// POST /models/{model}:streamGenerateContent?alt=sse. Each SSE event carries a
    /// GenerateContentResponse; text parts of the first candidate are the fragments.
    /// History is only extended when the stream completes without error.
    async fn send_message_stream(
        &self,
        parts: Vec<Part>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, LlmError> {
        let user_turn = Content {
            role: Some("user".to_string()),
            parts: parts.into_iter().map(WirePart::from).collect(),
        };
        let mut contents = self.history.lock().await.clone();
        contents.push(user_turn.clone());

        let url = format!("{}/models/{}:streamGenerateContent", self.base_url, self.model);
        let body = GenerateContentRequest {
            contents: &contents,
            system_instruction: self.system_instruction.as_ref().map(|s| Content {
                role: None,
                parts: vec![WirePart::text(s.clone())],
            }),
        };
        log::info!("gemini: streaming {} with {} turn(s)", self.model, contents.len());
        let res = self
            .client
            .post(&url)
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }

        let mut stream = res.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(LlmError::Request)?;
            for data in decoder.push(&chunk) {
                handle_event(&data, &mut reply, on_chunk)?;
            }
        }
        if let Some(data) = decoder.finish() {
            handle_event(&data, &mut reply, on_chunk)?;
        }

        // A turn with no model text (e.g. blocked for safety) is not resent as context;
        // the API rejects empty model turns.
        if reply.is_empty() {
            log::debug!("gemini: empty reply, turn left out of history");
            return Ok(reply);
        }
        let mut history = self.history.lock().await;
        history.push(user_turn);
        history.push(Content {
            role: Some("model".to_string()),
            parts: vec![WirePart::text(reply.clone())],
        });
        Ok(reply)
    }
}

fn handle_event(
    data: &str,
    reply: &mut String,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<(), LlmError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(());
    }
    let event: GenerateContentResponse = serde_json::from_str(data)?;
    if let Some(err) = event.error {
        return Err(LlmError::Api(format!(
            "{} {}",
            err.code.map(|c| c.to_string()).unwrap_or_default(),
            err.message
        )
        .trim()
        .to_string()));
    }
    let parts = event
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();
    for part in parts {
        if part.thought {
            continue;
        }
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            on_chunk(&text);
            reply.push_str(&text);
        }
    }
    Ok(())
}

/// One turn of a conversation in wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<WirePart>,
}

impl Content {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(|p| p.text.as_deref()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    /// Set by the model on reasoning summaries; never part of the reply text.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thought: bool,
}

impl WirePart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl From<Part> for WirePart {
    fn from(part: Part) -> Self {
        match part {
            Part::Text(text) => WirePart::text(text),
            Part::InlineData { mime_type, data } => WirePart {
                inline_data: Some(InlineData { mime_type, data }),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModel {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<GeminiModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(data: &str) -> (Result<(), LlmError>, Vec<String>, String) {
        let mut seen = Vec::new();
        let mut reply = String::new();
        let res = {
            let mut cb = |s: &str| seen.push(s.to_string());
            handle_event(data, &mut reply, &mut cb)
        };
        (res, seen, reply)
    }

    #[test]
    fn text_parts_become_fragments() {
        let (res, seen, reply) = collect(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"ko"},{"text":"homada?"}]}}]}"#,
        );
        assert!(res.is_ok());
        assert_eq!(seen, vec!["ko", "homada?"]);
        assert_eq!(reply, "kohomada?");
    }

    #[test]
    fn thoughts_and_empty_text_are_skipped() {
        let (_, seen, _) = collect(
            r#"{"candidates":[{"content":{"parts":[{"text":"plan","thought":true},{"text":""},{"text":"hi"}]}}]}"#,
        );
        assert_eq!(seen, vec!["hi"]);
    }

    #[test]
    fn usage_only_event_emits_nothing() {
        let (res, seen, _) = collect(r#"{"usageMetadata":{"totalTokenCount":12}}"#);
        assert!(res.is_ok());
        assert!(seen.is_empty());
    }

    #[test]
    fn truncated_event_is_decode_error() {
        let (res, seen, _) = collect(r#"{"candidates":[{"content":{"parts":[{"text":"homa"#);
        assert!(matches!(res, Err(LlmError::Decode(_))));
        assert!(seen.is_empty());
    }

    #[test]
    fn error_event_is_api_error() {
        let (res, _, _) = collect(r#"{"error":{"code":503,"message":"overloaded"}}"#);
        match res {
            Err(LlmError::Api(msg)) => assert_eq!(msg, "503 overloaded"),
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn request_serializes_camel_case_inline_data() {
        let contents = vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                WirePart::from(Part::InlineData {
                    mime_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                }),
                WirePart::from(Part::Text("caption".to_string())),
            ],
        }];
        let req = GenerateContentRequest {
            contents: &contents,
            system_instruction: Some(Content {
                role: None,
                parts: vec![WirePart::text("persona".to_string())],
            }),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "inlineData": { "mimeType": "image/png", "data": "AAAA" } },
                        { "text": "caption" }
                    ]
                }],
                "systemInstruction": { "parts": [{ "text": "persona" }] }
            })
        );
    }

    #[test]
    fn model_prefix_and_trailing_slash_are_normalized() {
        let client = GeminiClient::new(Some("http://localhost:1/v1beta/".into()), "k", "models/gemini-2.5-flash");
        assert_eq!(client.model(), "gemini-2.5-flash");
        assert_eq!(client.base_url, "http://localhost:1/v1beta");
    }
}
