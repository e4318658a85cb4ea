pub mod api;

use crate::cli::RelayArgs;
use crate::llm::chat::new_client;
use crate::llm::LlmConfig;
use log::{ info, warn };
use std::error::Error;
use tokio::net::TcpListener;

use self::api::AppState;

pub struct Server {
    addr: String,
    args: RelayArgs,
}

impl Server {
    pub fn new(addr: String, args: RelayArgs) -> Self {
        Self { addr, args }
    }

    fn app_state(&self) -> Result<AppState, Box<dyn Error + Send + Sync>> {
        let config = LlmConfig {
            llm_type: self.args.chat_llm_type.parse()?,
            api_key: self.args.chat_api_key.clone().filter(|k| !k.is_empty()),
            completion_model: self.args.chat_model.clone(),
            base_url: self.args.chat_base_url.clone(),
        };

        let chat_client = match new_client(&config) {
            Ok(client) => {
                info!(
                    "Chat client configured: Type={}, Model={}, BaseURL={}",
                    config.llm_type,
                    client.get_model(),
                    client.get_base_url().as_deref().unwrap_or("adapter default")
                );
                Ok(client)
            }
            Err(e) => {
                warn!("Chat client unavailable, /api/chat will answer with an error: {}", e);
                Err(e.to_string())
            }
        };
        Ok(AppState { chat_client })
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let state = self.app_state()?;
        let listener = TcpListener::bind(&self.addr).await.map_err(|e|
            format!("Failed to bind conversation relay to {}: {}", self.addr, e)
        )?;
        api::serve(listener, state).await
    }
}
