use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, ChatClient, ChatStream, ProviderMessage, RelayError, StreamLine };
use crate::llm::LlmConfig;

const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<ProviderMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    error: Option<OpenAIStreamError>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OpenAIStreamError {
    Detailed {
        message: String,
    },
    Plain(String),
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, RelayError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = base_url.unwrap_or_else(|| DEFAULT_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                RelayError::InvalidApiKey(e.to_string())
            )?
        );

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, RelayError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(RelayError::MissingApiKey("OpenAI"))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }
}

pub fn parse_sse_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return StreamLine::Skip;
    };
    if data.is_empty() || data == "[DONE]" {
        return StreamLine::Skip;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(OpenAIStreamResponse { error: Some(err), .. }) =>
            match err {
                OpenAIStreamError::Detailed { message } | OpenAIStreamError::Plain(message) =>
                    StreamLine::Error(message),
            }
        Ok(stream_resp) => {
            let text: String = stream_resp.choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            if text.is_empty() { StreamLine::Skip } else { StreamLine::Token(text) }
        }
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            StreamLine::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(&self, messages: Vec<ProviderMessage>) -> Result<ChatStream, RelayError> {
        let url = self.base_url.trim_end_matches('/').to_string();
        info!("Streaming {} messages to OpenAI model {}", messages.len(), self.model);

        let req = OpenAIChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.7,
            stream: true,
        };

        http_stream_generate(&self.http, &url, req, parse_sse_line, None).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_delta_is_extracted() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(parse_sse_line(line), StreamLine::Token("Hello".to_string()));
    }

    #[test]
    fn sse_error_payload_is_reported() {
        let line = r#"data: {"error":{"message":"The server had an error while processing your request.","type":"server_error"}}"#;
        assert_eq!(
            parse_sse_line(line),
            StreamLine::Error("The server had an error while processing your request.".to_string())
        );
    }

    #[test]
    fn sse_control_lines_are_skipped() {
        assert_eq!(parse_sse_line("data: [DONE]"), StreamLine::Skip);
        assert_eq!(parse_sse_line(""), StreamLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), StreamLine::Skip);
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), StreamLine::Skip);
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = LlmConfig { api_key: Some("  ".to_string()), ..LlmConfig::default() };
        assert!(matches!(OpenAIChatClient::from_config(&config), Err(RelayError::MissingApiKey(_))));
    }
}
