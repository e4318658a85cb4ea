use futures::StreamExt;
use log::{ error, info, warn };
use std::sync::{ Arc, Mutex, MutexGuard };
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::client::ConversationBackend;
use super::{ ConversationSession, SessionState, StreamTicket };
use crate::config::prompt::PromptConfig;
use crate::models::chat::ConversationMessage;

const EVENT_CAPACITY: usize = 256;

/// Notifications for a renderer. Only events that changed the session are
/// published; dropped increments never show up here.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StreamStarted {
        stream_id: u64,
    },
    Increment {
        stream_id: u64,
        message_id: String,
        text: String,
    },
    StreamCompleted {
        stream_id: u64,
    },
    StreamFailed {
        stream_id: u64,
        message: String,
    },
    ContextChanged {
        diagnosis: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub diagnosis: Option<String>,
    pub transcript: Vec<ConversationMessage>,
    pub input: String,
    pub state: SessionState,
    pub active_error: Option<String>,
    pub suggestions: Vec<String>,
    pub suggestions_visible: bool,
}

/// Drives a [`ConversationSession`] against a [`ConversationBackend`].
///
/// The session lock is only ever taken between awaits, so every transition
/// runs to completion before the next one starts.
#[derive(Clone)]
pub struct ConversationController {
    backend: Arc<dyn ConversationBackend>,
    session: Arc<Mutex<ConversationSession>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ConversationController {
    pub fn new(
        backend: Arc<dyn ConversationBackend>,
        prompts: Arc<PromptConfig>,
        diagnosis: Option<String>
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            session: Arc::new(Mutex::new(ConversationSession::new(prompts, diagnosis))),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationSession> {
        lock_session(&self.session)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.lock();
        SessionSnapshot {
            diagnosis: session.diagnosis().map(str::to_string),
            transcript: session.transcript().to_vec(),
            input: session.input().to_string(),
            state: session.state(),
            active_error: session.active_error().map(str::to_string),
            suggestions: session
                .suggestions()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            suggestions_visible: session.suggestions_visible(),
        }
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.lock().set_input(text);
    }

    pub fn select_suggestion(&self, text: &str) {
        self.lock().select_suggestion(text);
    }

    pub fn change_context(&self, diagnosis: Option<String>) {
        let diagnosis = {
            let mut session = self.lock();
            session.change_context(diagnosis);
            session.diagnosis().map(str::to_string)
        };
        let _ = self.events.send(SessionEvent::ContextChanged { diagnosis });
    }

    /// Submits the input buffer. Returns the handle of the streaming task, or
    /// `None` if the submission was rejected.
    pub fn send(&self) -> Option<JoinHandle<()>> {
        let ticket = self.lock().submit()?;
        Some(self.dispatch(ticket))
    }

    pub fn retry(&self) -> Option<JoinHandle<()>> {
        let ticket = self.lock().retry()?;
        info!("Retrying conversation request as stream #{}", ticket.stream_id);
        Some(self.dispatch(ticket))
    }

    fn dispatch(&self, ticket: StreamTicket) -> JoinHandle<()> {
        let _ = self.events.send(SessionEvent::StreamStarted {
            stream_id: ticket.stream_id,
        });
        tokio::spawn(
            run_stream(Arc::clone(&self.backend), Arc::clone(&self.session), self.events.clone(), ticket)
        )
    }
}

fn lock_session(session: &Mutex<ConversationSession>) -> MutexGuard<'_, ConversationSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_stream(
    backend: Arc<dyn ConversationBackend>,
    session: Arc<Mutex<ConversationSession>>,
    events: broadcast::Sender<SessionEvent>,
    ticket: StreamTicket
) {
    let stream_id = ticket.stream_id;
    info!("Dispatching conversation stream #{}", stream_id);

    let mut stream = match backend.open_stream(&ticket.request).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Conversation stream #{} failed to start: {}", stream_id, e);
            fail(&session, &events, stream_id, &e.to_string());
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                if text.is_empty() {
                    continue;
                }
                let applied = lock_session(&session).apply_increment(stream_id, &text);
                if !applied {
                    warn!("Stream #{} is no longer active, abandoning it", stream_id);
                    return;
                }
                let _ = events.send(SessionEvent::Increment {
                    stream_id,
                    message_id: ticket.target_id.clone(),
                    text,
                });
            }
            Err(e) => {
                error!("Conversation stream #{} failed: {}", stream_id, e);
                fail(&session, &events, stream_id, &e.to_string());
                return;
            }
        }
    }

    let completed = lock_session(&session).complete(stream_id);
    if completed {
        info!("Conversation stream #{} completed", stream_id);
        let _ = events.send(SessionEvent::StreamCompleted { stream_id });
    }
}

fn fail(
    session: &Mutex<ConversationSession>,
    events: &broadcast::Sender<SessionEvent>,
    stream_id: u64,
    message: &str
) {
    let failed = {
        let mut session = lock_session(session);
        if session.fail(stream_id, message) {
            session.active_error().map(str::to_string)
        } else {
            None
        }
    };
    if let Some(message) = failed {
        let _ = events.send(SessionEvent::StreamFailed { stream_id, message });
    }
}
