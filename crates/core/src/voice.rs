//! Voice session state.
//!
//! A `VoiceAgent` is the real-time provider: it turns the user's speech into
//! text, answers, and reports what happens as `VoiceEvent`s. `VoiceSession`
//! owns one agent, folds its events into a status and a growing transcript,
//! and publishes the transcript on a watch channel for whoever persists it.

use crate::model::{Role, TranscriptEntry};
use anyhow::{Result, bail};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Listening,
    Speaking,
    Error,
}

/// Events a provider emits back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    Connected,
    Listening,
    UserTranscript(String),
    AssistantTranscript(String),
    Speaking,
    SpeakingDone,
    Error(String),
    Closed,
}

/// A real-time, bidirectional assistant backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoiceAgent: Send + Sync {
    /// Opens a session and returns the stream of its events.
    async fn connect(&mut self) -> Result<mpsc::Receiver<VoiceEvent>>;

    /// Sends a typed message as if it had been spoken.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Forgets the conversation so far and returns a fresh event stream.
    ///
    /// Nothing produced for the old conversation arrives on the new stream.
    async fn reset(&mut self) -> Result<mpsc::Receiver<VoiceEvent>>;

    async fn disconnect(&mut self) -> Result<()>;
}

pub struct VoiceSession<A: VoiceAgent> {
    agent: A,
    status: VoiceStatus,
    error: Option<String>,
    events: Option<mpsc::Receiver<VoiceEvent>>,
    transcript_tx: watch::Sender<Vec<TranscriptEntry>>,
}

impl<A: VoiceAgent> VoiceSession<A> {
    pub fn new(agent: A) -> Self {
        let (transcript_tx, _) = watch::channel(Vec::new());
        Self {
            agent,
            status: VoiceStatus::Idle,
            error: None,
            events: None,
            transcript_tx,
        }
    }

    pub fn status(&self) -> VoiceStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_session_active(&self) -> bool {
        self.events.is_some()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript_tx.borrow().clone()
    }

    /// Every change to the transcript, as a full snapshot.
    pub fn watch_transcript(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.transcript_tx.subscribe()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_session_active() {
            return Ok(());
        }
        self.status = VoiceStatus::Connecting;
        self.error = None;

        match self.agent.connect().await {
            Ok(events) => {
                tracing::info!("voice session started");
                self.events = Some(events);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to start voice session");
                self.status = VoiceStatus::Error;
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn stop(&mut self) {
        if !self.is_session_active() {
            return;
        }
        if let Err(e) = self.agent.disconnect().await {
            tracing::warn!(error = ?e, "voice agent did not disconnect cleanly");
        }
        self.events = None;
        self.status = VoiceStatus::Idle;
        tracing::info!("voice session stopped");
    }

    pub async fn toggle(&mut self) -> Result<()> {
        if self.is_session_active() {
            self.stop().await;
            Ok(())
        } else {
            self.start().await
        }
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.is_session_active() {
            bail!("voice session is not active");
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.agent.send_text(text.to_string()).await
    }

    /// Empties the transcript.
    pub fn clear_transcript(&mut self) {
        self.transcript_tx.send_replace(Vec::new());
    }

    /// Starts over with an empty transcript.
    ///
    /// An active agent is reset first and its old event stream dropped, so a
    /// late answer from the previous conversation never lands in the new one.
    pub async fn new_conversation(&mut self) -> Result<()> {
        if self.is_session_active() {
            match self.agent.reset().await {
                Ok(events) => {
                    self.events = Some(events);
                    self.status = VoiceStatus::Listening;
                    self.error = None;
                }
                Err(e) => {
                    tracing::error!(error = ?e, "failed to reset voice agent");
                    self.stop().await;
                    self.status = VoiceStatus::Error;
                    self.error = Some(e.to_string());
                    self.clear_transcript();
                    return Err(e);
                }
            }
        }
        self.clear_transcript();
        Ok(())
    }

    /// Waits for the next provider event and applies it.
    ///
    /// Pends forever while no session is active, so it can sit in a `select!`.
    pub async fn next_event(&mut self) -> Option<VoiceEvent> {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };
        let event = events.recv().await.unwrap_or(VoiceEvent::Closed);
        self.apply(event.clone());
        Some(event)
    }

    pub fn apply(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Connected => {
                self.status = VoiceStatus::Connected;
                self.error = None;
            }
            VoiceEvent::Listening | VoiceEvent::SpeakingDone => self.status = VoiceStatus::Listening,
            VoiceEvent::Speaking => self.status = VoiceStatus::Speaking,
            VoiceEvent::UserTranscript(text) => self.push_entry(Role::User, &text),
            VoiceEvent::AssistantTranscript(text) => self.push_entry(Role::Assistant, &text),
            VoiceEvent::Error(message) => {
                tracing::warn!(%message, "voice agent error");
                self.status = VoiceStatus::Error;
                self.error = Some(message);
            }
            VoiceEvent::Closed => {
                self.events = None;
                if self.status != VoiceStatus::Error {
                    self.status = VoiceStatus::Idle;
                }
            }
        }
    }

    fn push_entry(&mut self, role: Role, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.transcript_tx
            .send_modify(|entries| entries.push(TranscriptEntry::new(role, text)));
    }
}
