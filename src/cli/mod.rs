use clap::{ Args as ClapArgs, Parser, Subcommand };
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Remote Service Args ---
    /// Base URL of the ECG classification service (e.g., http://localhost:5000)
    #[arg(long, env = "ECG_API_URL", default_value = "http://localhost:5000", global = true)]
    pub ecg_api_url: String,

    /// Streaming conversation endpoint (the relay's /api/chat route)
    #[arg(
        long,
        env = "CHAT_RELAY_URL",
        default_value = "http://127.0.0.1:3000/api/chat",
        global = true
    )]
    pub chat_relay_url: String,

    /// Request timeout in seconds for both services. 0 means no timeout.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "0", global = true)]
    pub request_timeout_secs: u64,

    /// Optional JSON file overriding the greeting and system instruction templates.
    #[arg(long, env = "PROMPTS_PATH", global = true)]
    pub prompts_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the conversation relay that forwards chat requests to an LLM provider.
    Serve(RelayArgs),

    /// Classify one ECG CSV file, or several in a single batch request.
    Classify {
        /// CSV files to submit
        #[arg(required = true)]
        files: Vec<String>,

        /// Print the verdicts as JSON instead of a report
        #[arg(long, default_value = "false")]
        json: bool,

        /// Open a chat primed with the diagnosis after a single-file classification
        #[arg(long, default_value = "false")]
        chat: bool,
    },

    /// Check whether the classification service and its model are loaded.
    Health,

    /// List the diagnosis classes the classification service can emit.
    Classes,

    /// Chat with the cardiology assistant.
    Chat {
        /// Diagnosis label to scope the conversation to
        #[arg(long)]
        diagnosis: Option<String>,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RelayArgs {
    /// Host address and port for the relay to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Type of LLM provider for chat completion (openai, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (required for OpenAI)
    #[arg(long, env = "CHAT_API_KEY", hide_env_values = true)]
    pub chat_api_key: Option<String>,

    /// Model name for chat completion (e.g., gpt-4o-mini, llama3.1)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_accepts_several_files() {
        let args = Args::try_parse_from(["ecg-assist", "classify", "a.csv", "b.csv", "--json"]).unwrap();
        match args.command {
            Command::Classify { files, json, chat } => {
                assert_eq!(files, vec!["a.csv", "b.csv"]);
                assert!(json);
                assert!(!chat);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn zero_timeout_means_none() {
        let args = Args::try_parse_from([
            "ecg-assist",
            "--request-timeout-secs",
            "0",
            "health",
        ]).unwrap();
        assert_eq!(args.request_timeout(), None);
        let args = Args::try_parse_from(["ecg-assist", "health", "--request-timeout-secs", "15"]).unwrap();
        assert_eq!(args.request_timeout(), Some(Duration::from_secs(15)));
    }
}
