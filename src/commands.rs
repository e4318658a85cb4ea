use log::{ info, warn };
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::classify::client::{ CsvUpload, HttpClassifier };
use crate::classify::report::{ render, render_batch };
use crate::classify::{ ClassificationController, SubmitOutcome };
use crate::cli::{ Args, RelayArgs };
use crate::config::prompt::{ load_or_default, PromptConfig };
use crate::models::chat::Role;
use crate::server::Server;
use crate::session::controller::{ ConversationController, SessionEvent, SessionSnapshot };
use crate::session::client::HttpConversationClient;
use crate::session::SessionState;

type CmdResult = Result<(), Box<dyn Error + Send + Sync>>;

pub async fn serve(relay: RelayArgs) -> CmdResult {
    let addr = relay.server_addr.clone();
    info!("Starting conversation relay on: {}", addr);
    Server::new(addr, relay).run().await
}

pub async fn health(args: &Args) -> CmdResult {
    let classifier = HttpClassifier::new(&args.ecg_api_url, args.request_timeout())?;
    let status = classifier.health().await?;
    println!("status: {}", status.status);
    println!("model loaded: {}", status.model_loaded);
    println!("scaler loaded: {}", status.scaler_loaded);
    println!("class mapping loaded: {}", status.class_mapping_loaded);
    if !status.is_ready() {
        return Err("classification service is not ready".into());
    }
    Ok(())
}

pub async fn classes(args: &Args) -> CmdResult {
    let classifier = HttpClassifier::new(&args.ecg_api_url, args.request_timeout())?;
    let list = classifier.classes().await?;
    for class in &list.classes {
        println!("{}", class);
    }
    println!("({} classes)", list.total_classes);
    Ok(())
}

pub async fn classify(args: &Args, files: &[String], json: bool, chat_after: bool) -> CmdResult {
    let classifier = HttpClassifier::new(&args.ecg_api_url, args.request_timeout())?;

    if let [file] = files {
        let upload = CsvUpload::from_path(file).await?;
        let controller = ClassificationController::new(Arc::new(classifier));
        let outcome = controller.submit(Some(upload)).await;
        if let SubmitOutcome::Applied(verdict) = &outcome {
            if json {
                println!("{}", serde_json::to_string_pretty(verdict)?);
            } else {
                println!("{}", render(&controller.display_state()));
            }
        }
        if chat_after {
            match controller.diagnosis_context() {
                Some(diagnosis) => {
                    return chat(args, Some(diagnosis)).await;
                }
                None => warn!("No successful diagnosis to discuss, skipping chat"),
            }
        }
        return Ok(());
    }

    let mut uploads = Vec::with_capacity(files.len());
    for file in files {
        uploads.push(CsvUpload::from_path(file).await?);
    }
    let batch = classifier.predict_batch(&uploads).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&batch)?);
    } else {
        println!("{}", render_batch(&batch));
    }
    Ok(())
}

pub async fn chat(args: &Args, diagnosis: Option<String>) -> CmdResult {
    let prompts: Arc<PromptConfig> = load_or_default(args.prompts_path.as_deref());
    let backend = HttpConversationClient::new(&args.chat_relay_url, args.request_timeout())?;
    let controller = ConversationController::new(Arc::new(backend), prompts, diagnosis);

    let printer = tokio::spawn(print_events(controller.subscribe()));
    print_transcript(&controller.snapshot());
    print_suggestions(&controller.snapshot());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt_marker();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        let handle = match ReplCommand::parse(line) {
            ReplCommand::Quit => {
                break;
            }
            ReplCommand::Retry => {
                let handle = controller.retry();
                if handle.is_none() {
                    println!("Nothing to retry.");
                }
                handle
            }
            ReplCommand::Suggest(n) => {
                let snapshot = controller.snapshot();
                match snapshot.suggestions.get(n.wrapping_sub(1)) {
                    Some(text) if snapshot.suggestions_visible => {
                        controller.select_suggestion(text);
                        println!("Input: {} (Enter or /send to ask)", text);
                        None
                    }
                    _ => {
                        println!("No suggestion #{}.", n);
                        None
                    }
                }
            }
            ReplCommand::Context(label) => {
                controller.change_context(label);
                None
            }
            ReplCommand::Send => submit_input(&controller),
            ReplCommand::Message(text) => {
                controller.set_input(text);
                submit_input(&controller)
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Conversation task ended abnormally: {}", e);
            }
            print_suggestions(&controller.snapshot());
        }
    }

    drop(controller);
    printer.abort();
    Ok(())
}

fn submit_input(controller: &ConversationController) -> Option<JoinHandle<()>> {
    if controller.snapshot().state == SessionState::Streaming {
        println!("Still answering, please wait.");
        return None;
    }
    controller.send()
}

#[derive(Debug, PartialEq)]
enum ReplCommand {
    Quit,
    Retry,
    Send,
    Suggest(usize),
    Context(Option<String>),
    Message(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Self {
        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) | ("/send", _) => ReplCommand::Send,
            ("/quit", _) | ("/exit", _) => ReplCommand::Quit,
            ("/retry", _) => ReplCommand::Retry,
            ("/suggest", n) =>
                match n.trim().parse() {
                    Ok(n) => ReplCommand::Suggest(n),
                    Err(_) => ReplCommand::Suggest(0),
                }
            ("/context", label) => {
                let label = label.trim();
                ReplCommand::Context((!label.is_empty()).then(|| label.to_string()))
            }
            _ => ReplCommand::Message(line.to_string()),
        }
    }
}

fn prompt_marker() {
    print!("you> ");
    let _ = std::io::stdout().flush();
}

fn print_transcript(snapshot: &SessionSnapshot) {
    match &snapshot.diagnosis {
        Some(diagnosis) => println!("[context: {}]", diagnosis),
        None => println!("[context: general cardiology]"),
    }
    for message in &snapshot.transcript {
        match message.role {
            Role::Assistant => println!("assistant> {}", message.content),
            Role::User => println!("you> {}", message.content),
        }
    }
}

fn print_suggestions(snapshot: &SessionSnapshot) {
    if !snapshot.suggestions_visible {
        return;
    }
    println!("Suggested questions (/suggest <n> to fill the input):");
    for (i, text) in snapshot.suggestions.iter().enumerate() {
        println!("  {}. {}", i + 1, text);
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    let mut out = std::io::stdout();
    loop {
        match events.recv().await {
            Ok(SessionEvent::StreamStarted { .. }) => {
                let _ = write!(out, "assistant> ");
                let _ = out.flush();
            }
            Ok(SessionEvent::Increment { text, .. }) => {
                let _ = write!(out, "{}", text);
                let _ = out.flush();
            }
            Ok(SessionEvent::StreamCompleted { .. }) => {
                let _ = writeln!(out);
            }
            Ok(SessionEvent::StreamFailed { message, .. }) => {
                let _ = writeln!(out);
                let _ = writeln!(out, "Error: {} (type /retry to try again)", message);
            }
            Ok(SessionEvent::ContextChanged { diagnosis }) => {
                let _ = writeln!(
                    out,
                    "[context changed to {}]",
                    diagnosis.as_deref().unwrap_or("general cardiology")
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Renderer fell behind by {} events", skipped);
            }
            Err(RecvError::Closed) => {
                break;
            }
        }
    }
}
