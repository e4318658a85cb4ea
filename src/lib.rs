pub mod classify;
pub mod cli;
pub mod commands;
pub mod config;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;
pub mod stream;
pub mod suggestions;

use cli::{ Args, Command };
use log::info;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("ECG API URL: {}", args.ecg_api_url);
    info!("Chat Relay URL: {}", args.chat_relay_url);
    match args.request_timeout() {
        Some(timeout) => info!("Request Timeout: {}s", timeout.as_secs()),
        None => info!("Request Timeout: none"),
    }
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    if let Command::Serve(relay) = &args.command {
        info!("Server Address: {}", relay.server_addr);
        info!("Chat LLM Type: {}", relay.chat_llm_type);
        info!("Chat Model: {}", relay.chat_model.as_deref().unwrap_or("adapter default"));
    }
    info!("-------------------------");

    match args.command.clone() {
        Command::Serve(relay) => commands::serve(relay).await,
        Command::Classify { files, json, chat } => commands::classify(&args, &files, json, chat).await,
        Command::Health => commands::health(&args).await,
        Command::Classes => commands::classes(&args).await,
        Command::Chat { diagnosis } => commands::chat(&args, diagnosis).await,
    }
}
