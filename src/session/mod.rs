//! Conversation session state machine.
//!
//! [`ConversationSession`] holds the transcript and all streaming state, and
//! performs every transition synchronously. Each dispatched request is tagged
//! with a stream id; increments, completions and failures carrying any id but
//! the active one are dropped, which keeps a superseded or failed stream from
//! touching the transcript. [`controller::ConversationController`] drives the
//! transport on top of it.

pub mod client;
pub mod controller;

use log::{ debug, info, warn };
use std::sync::Arc;
use uuid::Uuid;

use crate::config::prompt::{ has_disclaimer, PromptConfig };
use crate::models::chat::{ ChatRequest, ConversationMessage, Role, WireMessage };
use crate::suggestions;

pub const GENERIC_STREAM_ERROR: &str = "Something went wrong while generating a response. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamTicket {
    pub stream_id: u64,
    pub target_id: String,
    pub request: ChatRequest,
}

#[derive(Clone, Debug)]
struct ActiveStream {
    stream_id: u64,
    target_id: String,
}

pub struct ConversationSession {
    prompts: Arc<PromptConfig>,
    diagnosis: Option<String>,
    system_instruction: String,
    transcript: Vec<ConversationMessage>,
    input: String,
    state: SessionState,
    active_error: Option<String>,
    suggestions_visible: bool,
    active_stream: Option<ActiveStream>,
    last_ticket: Option<StreamTicket>,
    next_stream_id: u64,
}

impl ConversationSession {
    pub fn new(prompts: Arc<PromptConfig>, diagnosis: Option<String>) -> Self {
        let mut session = Self {
            prompts,
            diagnosis: None,
            system_instruction: String::new(),
            transcript: Vec::new(),
            input: String::new(),
            state: SessionState::Idle,
            active_error: None,
            suggestions_visible: true,
            active_stream: None,
            last_ticket: None,
            next_stream_id: 0,
        };
        session.change_context(diagnosis);
        session
    }

    /// Starts over for a new diagnosis context. Any stream still running for
    /// the previous context loses its claim on the transcript.
    pub fn change_context(&mut self, diagnosis: Option<String>) {
        let diagnosis = diagnosis.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        let instruction = self.prompts.system_instruction(diagnosis.as_deref());
        debug_assert!(has_disclaimer(&instruction));

        if let Some(stale) = self.active_stream.take() {
            info!("Abandoning stream #{} on context change", stale.stream_id);
        }
        self.transcript = vec![ConversationMessage {
            id: new_message_id(),
            role: Role::Assistant,
            content: self.prompts.greeting(diagnosis.as_deref()),
        }];
        self.system_instruction = instruction;
        self.diagnosis = diagnosis;
        self.state = SessionState::Idle;
        self.active_error = None;
        self.suggestions_visible = true;
        self.last_ticket = None;
        info!("Conversation context set to {:?}", self.diagnosis);
    }

    pub fn diagnosis(&self) -> Option<&str> {
        self.diagnosis.as_deref()
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn transcript(&self) -> &[ConversationMessage] {
        &self.transcript
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn active_error(&self) -> Option<&str> {
        self.active_error.as_deref()
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        suggestions::resolve(self.diagnosis.as_deref())
    }

    pub fn suggestions_visible(&self) -> bool {
        self.suggestions_visible
    }

    pub fn select_suggestion(&mut self, text: &str) {
        self.input = text.to_string();
        self.suggestions_visible = false;
    }

    /// Appends the user's message and an empty assistant placeholder, and
    /// returns the request to dispatch. Returns `None` and changes nothing
    /// while a stream is in flight or when the input is blank.
    pub fn submit(&mut self) -> Option<StreamTicket> {
        if self.is_streaming() {
            debug!("Submission rejected: a response is still streaming");
            return None;
        }
        let content = self.input.trim();
        if content.is_empty() {
            return None;
        }

        self.transcript.push(ConversationMessage {
            id: new_message_id(),
            role: Role::User,
            content: content.to_string(),
        });
        self.input.clear();
        self.suggestions_visible = false;

        let request = ChatRequest {
            messages: self.transcript
                .iter()
                .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
                .map(WireMessage::from)
                .collect(),
            system_message: self.system_instruction.clone(),
        };

        let target_id = new_message_id();
        self.transcript.push(ConversationMessage {
            id: target_id.clone(),
            role: Role::Assistant,
            content: String::new(),
        });

        let ticket = self.begin_stream(target_id, request);
        self.last_ticket = Some(ticket.clone());
        Some(ticket)
    }

    /// Re-sends the last request after a failure. The assistant placeholder is
    /// emptied so the new answer replaces the partial one.
    pub fn retry(&mut self) -> Option<StreamTicket> {
        if self.state != SessionState::Error || self.active_error.is_none() {
            return None;
        }
        let previous = self.last_ticket.clone()?;
        if let Some(target) = self.message_mut(&previous.target_id) {
            target.content.clear();
        }
        let ticket = self.begin_stream(previous.target_id, previous.request);
        self.last_ticket = Some(ticket.clone());
        Some(ticket)
    }

    fn begin_stream(&mut self, target_id: String, request: ChatRequest) -> StreamTicket {
        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;
        self.active_stream = Some(ActiveStream {
            stream_id,
            target_id: target_id.clone(),
        });
        self.state = SessionState::Streaming;
        self.active_error = None;
        StreamTicket {
            stream_id,
            target_id,
            request,
        }
    }

    fn is_active(&self, stream_id: u64) -> bool {
        self.state == SessionState::Streaming &&
            self.active_stream.as_ref().map(|s| s.stream_id) == Some(stream_id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ConversationMessage> {
        self.transcript.iter_mut().find(|m| m.id == id)
    }

    /// Appends an increment to the active assistant message. Returns `false`
    /// if the increment belongs to a stream that is no longer active.
    pub fn apply_increment(&mut self, stream_id: u64, text: &str) -> bool {
        if !self.is_active(stream_id) {
            warn!("Dropping increment for inactive stream #{}", stream_id);
            return false;
        }
        let target_id = match &self.active_stream {
            Some(active) => active.target_id.clone(),
            None => return false,
        };
        match self.message_mut(&target_id) {
            Some(target) => {
                target.content.push_str(text);
                true
            }
            None => false,
        }
    }

    pub fn complete(&mut self, stream_id: u64) -> bool {
        if !self.is_active(stream_id) {
            return false;
        }
        self.active_stream = None;
        self.state = SessionState::Idle;
        self.active_error = None;
        true
    }

    pub fn fail(&mut self, stream_id: u64, message: &str) -> bool {
        if !self.is_active(stream_id) {
            return false;
        }
        let message = message.trim();
        self.active_stream = None;
        self.state = SessionState::Error;
        self.active_error = Some(
            if message.is_empty() { GENERIC_STREAM_ERROR.to_string() } else { message.to_string() }
        );
        true
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
