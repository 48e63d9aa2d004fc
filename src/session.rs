//! Per-session chat state and the actions that mutate it.
//!
//! A [`SessionState`] is owned by whoever drives the session (one web
//! session entry, or the terminal chat loop) and is passed by `&mut` to each
//! action. The only action that needs the model is [`SessionController::send`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::generation::{ErrorKind, GenerationError, GenerationService};
use crate::language::{InvalidSelection, Language};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Chronological list of messages. Appending is reserved to the session actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Transcript(Vec<Message>);

impl Transcript {
    pub fn messages(&self) -> &[Message] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, message: Message) {
        self.0.push(message);
    }

    fn clear(&mut self) {
        self.0 = Vec::new();
    }
}

/// Whether the display still owes us an empty input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputState {
    #[default]
    Idle,
    AwaitingClear,
}

/// Error shown after the transcript when a send fails. Never sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: ErrorKind,
    pub text: String,
}

impl Notice {
    fn from_error(err: &GenerationError) -> Self {
        let text = match err.kind() {
            ErrorKind::ServiceUnavailable => {
                "The assistant is unavailable right now. Please try again in a moment."
            }
            ErrorKind::RateLimited => {
                "Too many requests were sent. Please wait a little before trying again."
            }
            ErrorKind::InvalidResponse => {
                "The assistant's reply could not be read. Please try again."
            }
        };
        Self {
            kind: err.kind(),
            text: text.to_string(),
        }
    }
}

/// One block as the display renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry<'a> {
    pub role: Role,
    pub text: &'a str,
    pub is_error: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    transcript: Transcript,
    input: InputState,
    language: Language,
    draft: String,
    notice: Option<Notice>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(language: Language) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn input_state(&self) -> InputState {
        self.input
    }

    pub fn pending_clear(&self) -> bool {
        self.input == InputState::AwaitingClear
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Text the input field must show: always empty while a clear is pending.
    pub fn input_value(&self) -> &str {
        if self.pending_clear() {
            ""
        } else {
            &self.draft
        }
    }

    /// Transcript followed by the error notice, if any.
    pub fn entries(&self) -> Vec<Entry<'_>> {
        let mut entries: Vec<Entry<'_>> = self
            .transcript
            .messages()
            .iter()
            .map(|msg| Entry {
                role: msg.role,
                text: &msg.text,
                is_error: false,
            })
            .collect();
        if let Some(notice) = &self.notice {
            entries.push(Entry {
                role: Role::Assistant,
                text: &notice.text,
                is_error: true,
            });
        }
        entries
    }

    /// Clears the conversation. Always succeeds.
    pub fn reset(&mut self) {
        info!(discarded = self.transcript.len(), "Resetting chat");
        self.transcript.clear();
        self.notice = None;
        self.draft.clear();
        self.input = InputState::AwaitingClear;
    }

    /// Changes the response language; anything but an exact label leaves it untouched.
    pub fn select_language(&mut self, choice: &str) -> Result<Language, InvalidSelection> {
        let language = Language::from_label(choice)?;
        self.language = language;
        Ok(language)
    }

    /// Keeps text typed but not yet sent, e.g. across a language change.
    pub fn keep_draft(&mut self, text: &str) {
        self.draft = text.to_string();
        if !text.is_empty() {
            // The user typed into the field, so it was already shown empty.
            self.input = InputState::Idle;
        }
    }

    /// Called by the display once it has shown an empty input field.
    pub fn acknowledge_clear(&mut self) {
        if self.input == InputState::AwaitingClear {
            debug!("Input clear acknowledged");
            self.input = InputState::Idle;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank prompt, nothing happened.
    Ignored,
    Replied,
    Failed(ErrorKind),
}

/// Runs sends against a generation service with a bounded wait.
#[derive(Clone)]
pub struct SessionController {
    service: Arc<dyn GenerationService>,
    reply_timeout: Duration,
}

impl SessionController {
    pub fn new(service: Arc<dyn GenerationService>, reply_timeout: Duration) -> Self {
        Self {
            service,
            reply_timeout,
        }
    }

    pub async fn send(&self, state: &mut SessionState, prompt: &str, language: Language) -> SendOutcome {
        if prompt.trim().is_empty() {
            return SendOutcome::Ignored;
        }

        let full_prompt = language.apply(prompt);
        debug!(
            language = %language,
            prompt_chars = full_prompt.chars().count(),
            history = state.transcript.len(),
            "Sending prompt"
        );

        let reply = match tokio::time::timeout(
            self.reply_timeout,
            self.service.generate(state.transcript.messages(), &full_prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::ServiceUnavailable(format!(
                "no reply within {:?}",
                self.reply_timeout
            ))),
        };

        match reply {
            Ok(text) => {
                state.transcript.push(Message::new(Role::User, full_prompt));
                state.transcript.push(Message::new(Role::Assistant, text));
                state.notice = None;
                state.draft.clear();
                state.input = InputState::AwaitingClear;
                SendOutcome::Replied
            }
            Err(err) => {
                warn!(error = %err, "Generation failed, keeping prompt for retry");
                let notice = Notice::from_error(&err);
                let kind = notice.kind;
                state.notice = Some(notice);
                // Show the kept prompt again, even if a clear was still pending.
                state.draft = prompt.to_string();
                state.input = InputState::Idle;
                SendOutcome::Failed(kind)
            }
        }
    }
}
