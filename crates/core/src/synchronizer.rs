//! Incremental persistence of a live transcript.
//!
//! The voice session hands over the *whole* transcript every time it grows.
//! `TranscriptSynchronizer` remembers how many leading entries are already
//! stored (the watermark) and writes only the rest, one entry at a time and in
//! order. The watermark moves forward only after a write succeeds, so a failed
//! write is retried by the next update and nothing is ever written twice.
//!
//! Overlapping updates are serialized by a per-session async mutex. An update
//! that arrives while the conversation is still being created waits for the
//! lock, then re-reads the watermark and writes only what is still missing.
//!
//! `reset` starts a new logical conversation. It bumps an epoch counter
//! synchronously; updates captured under an older epoch are discarded once the
//! new epoch has taken over the session state.

use crate::model::{AuthUser, TranscriptEntry, provisional_title};
use crate::store::ConversationStore;
use crate::title::{TitleGenerator, assign_title, has_enough_context};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How much of the live transcript is durably stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Watermark {
    pub conversation_id: Option<Uuid>,
    pub persisted_count: usize,
    pub creation_in_flight: bool,
}

/// What a single reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Unauthenticated,
    EmptyTranscript,
    /// Every entry of the snapshot is already stored.
    UpToDate,
    /// The snapshot belongs to a conversation that has since been reset.
    Stale,
    /// The backing conversation could not be created; nothing was written.
    CreationFailed,
    Persisted {
        conversation_id: Uuid,
        written: usize,
        persisted_count: usize,
        /// A write failed and the pass stopped early.
        failed: bool,
    },
}

struct SessionState {
    epoch: u64,
    watermark: Watermark,
    title_requested: bool,
}

impl SessionState {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            watermark: Watermark::default(),
            title_requested: false,
        }
    }
}

struct Inner {
    store: Arc<dyn ConversationStore>,
    titles: Option<Arc<dyn TitleGenerator>>,
    epoch: AtomicU64,
    state: Mutex<SessionState>,
    watermark_tx: watch::Sender<Watermark>,
}

/// Persists one session's transcript. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TranscriptSynchronizer {
    inner: Arc<Inner>,
}

impl TranscriptSynchronizer {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        titles: Option<Arc<dyn TitleGenerator>>,
    ) -> Self {
        let (watermark_tx, _) = watch::channel(Watermark::default());
        Self {
            inner: Arc::new(Inner {
                store,
                titles,
                epoch: AtomicU64::new(0),
                state: Mutex::new(SessionState::new(0)),
                watermark_tx,
            }),
        }
    }

    /// The last published watermark.
    pub fn watermark(&self) -> Watermark {
        *self.inner.watermark_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Watermark> {
        self.inner.watermark_tx.subscribe()
    }

    /// Forgets the current conversation. The next update creates a new one.
    pub fn reset(&self) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.watermark_tx.send_replace(Watermark::default());
        tracing::info!(epoch, "transcript synchronizer reset");
    }

    /// Schedules persistence of `transcript` and returns immediately.
    ///
    /// The returned handle can be ignored; it is there for callers that want
    /// to observe the outcome.
    pub fn on_transcript_update(
        &self,
        user: Option<AuthUser>,
        transcript: Vec<TranscriptEntry>,
    ) -> JoinHandle<SyncOutcome> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move { this.sync_at(epoch, user.as_ref(), &transcript).await })
    }

    /// Reconciles `transcript` against the watermark and writes what is missing.
    pub async fn sync(&self, user: Option<&AuthUser>, transcript: &[TranscriptEntry]) -> SyncOutcome {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.sync_at(epoch, user, transcript).await
    }

    async fn sync_at(
        &self,
        epoch: u64,
        user: Option<&AuthUser>,
        transcript: &[TranscriptEntry],
    ) -> SyncOutcome {
        let Some(user) = user else {
            tracing::debug!("not authenticated, skipping transcript sync");
            return SyncOutcome::Unauthenticated;
        };
        if transcript.is_empty() {
            return SyncOutcome::EmptyTranscript;
        }

        let mut state = self.inner.state.lock().await;
        if epoch < state.epoch {
            tracing::debug!(epoch, current = state.epoch, "dropping transcript from a reset conversation");
            return SyncOutcome::Stale;
        }
        if epoch > state.epoch {
            *state = SessionState::new(epoch);
        }

        let start = state.watermark.persisted_count;
        if transcript.len() <= start {
            tracing::debug!(persisted = start, "transcript already persisted");
            return SyncOutcome::UpToDate;
        }

        let conversation_id = match state.watermark.conversation_id {
            Some(id) => id,
            None => {
                state.watermark.creation_in_flight = true;
                self.publish(&state);

                let title = provisional_title(&transcript[0]);
                let created = self.inner.store.create_conversation(&user.id, &title).await;
                state.watermark.creation_in_flight = false;
                match created {
                    Ok(conversation) => {
                        tracing::info!(
                            conversation_id = %conversation.id,
                            title = %conversation.title,
                            "conversation created"
                        );
                        state.watermark.conversation_id = Some(conversation.id);
                        self.publish(&state);
                        conversation.id
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "failed to create conversation");
                        self.publish(&state);
                        return SyncOutcome::CreationFailed;
                    }
                }
            }
        };

        let mut written = 0;
        let mut failed = false;
        for (index, entry) in transcript.iter().enumerate().skip(start) {
            match self
                .inner
                .store
                .add_message(conversation_id, entry.role, &entry.content)
                .await
            {
                Ok(message) => {
                    state.watermark.persisted_count = index + 1;
                    written += 1;
                    self.publish(&state);
                    tracing::debug!(%conversation_id, index, message_id = %message.id, "message saved");
                }
                Err(e) => {
                    tracing::warn!(%conversation_id, index, error = ?e, "failed to save message, will retry on next update");
                    failed = true;
                    break;
                }
            }
        }

        let persisted_count = state.watermark.persisted_count;
        tracing::info!(%conversation_id, written, persisted = persisted_count, "transcript sync finished");
        self.maybe_request_title(&mut state, conversation_id, &transcript[..persisted_count]);

        SyncOutcome::Persisted {
            conversation_id,
            written,
            persisted_count,
            failed,
        }
    }

    /// Publishes the watermark unless a reset has happened since `state` was current.
    fn publish(&self, state: &SessionState) {
        let epoch = &self.inner.epoch;
        self.inner.watermark_tx.send_if_modified(|published| {
            if epoch.load(Ordering::SeqCst) != state.epoch || *published == state.watermark {
                return false;
            }
            *published = state.watermark;
            true
        });
    }

    fn maybe_request_title(
        &self,
        state: &mut SessionState,
        conversation_id: Uuid,
        persisted: &[TranscriptEntry],
    ) {
        let Some(titles) = self.inner.titles.clone() else {
            return;
        };
        if state.title_requested || !has_enough_context(persisted) {
            return;
        }
        state.title_requested = true;

        let store = self.inner.store.clone();
        let messages = persisted.to_vec();
        tokio::spawn(async move {
            let title = assign_title(&*titles, &messages).await;
            match store.update_title(conversation_id, &title).await {
                Ok(Some(_)) => tracing::info!(%conversation_id, %title, "conversation titled"),
                Ok(None) => tracing::debug!(%conversation_id, "conversation gone before titling"),
                Err(e) => tracing::warn!(%conversation_id, error = ?e, "failed to store title"),
            }
        });
    }
}
