use async_trait::async_trait;
use log::{ debug, info };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::{ http_stream_generate, ChatClient, ChatStream, ProviderMessage, RelayError, StreamLine };
use crate::llm::{ LlmConfig, LlmType };

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ProviderMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    message: Option<StreamMessage>,
    error: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3.1".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, RelayError> {
        debug_assert_eq!(config.llm_type, LlmType::Ollama);
        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }
}

pub fn parse_chat_line(line: &str) -> StreamLine {
    if line.trim().is_empty() {
        return StreamLine::Skip;
    }
    match serde_json::from_str::<StreamResponse>(line) {
        Ok(StreamResponse { error: Some(err), .. }) => StreamLine::Error(err),
        Ok(StreamResponse { message: Some(m), .. }) if !m.content.is_empty() => StreamLine::Token(m.content),
        Ok(_) => StreamLine::Skip,
        Err(e) => {
            debug!("JSON parse error: {} for line: {}", e, line);
            StreamLine::Skip
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn stream_chat(&self, messages: Vec<ProviderMessage>) -> Result<ChatStream, RelayError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        info!("Streaming {} messages to Ollama model {}", messages.len(), self.completion_model);
        let req = ChatRequest {
            model: self.completion_model.clone(),
            messages,
            stream: true,
        };
        http_stream_generate(&self.http, &url, req, parse_chat_line, None).await
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
