//! Live session WebSocket.
//!
//! Each connection owns one `VoiceSession` and one `TranscriptSynchronizer`.
//! Every transcript change is sent to the client and handed to the
//! synchronizer; every watermark change is reported back as a `saved` frame.

use crate::auth::MaybeUser;
use crate::state::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use whisperer_core::chat_agent::ChatAgent;
use whisperer_core::voice::{VoiceAgent, VoiceSession, VoiceStatus};
use whisperer_core::{AuthUser, TranscriptEntry, TranscriptSynchronizer, Watermark};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Start,
    Stop,
    Toggle,
    Ask { text: String },
    NewConversation,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        status: VoiceStatus,
        active: bool,
        error: Option<String>,
    },
    Transcript {
        entries: Vec<TranscriptEntry>,
    },
    Saved {
        conversation_id: Option<Uuid>,
        persisted: usize,
    },
}

impl ServerFrame {
    fn status<A: VoiceAgent>(session: &VoiceSession<A>) -> Self {
        ServerFrame::Status {
            status: session.status(),
            active: session.is_session_active(),
            error: session.error().map(String::from),
        }
    }

    fn saved(watermark: Watermark) -> Self {
        ServerFrame::Saved {
            conversation_id: watermark.conversation_id,
            persisted: watermark.persisted_count,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
) -> Response {
    info!(authenticated = user.is_some(), "WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Returns `false` once the client is gone.
async fn send_frame<W>(outgoing: &mut W, frame: &ServerFrame) -> bool
where
    W: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = ?e, "failed to encode frame");
            return true;
        }
    };
    outgoing.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_frame<A: VoiceAgent>(
    frame: ClientFrame,
    session: &mut VoiceSession<A>,
    sync: &TranscriptSynchronizer,
) {
    let result = match frame {
        ClientFrame::Start => session.start().await,
        ClientFrame::Stop => {
            session.stop().await;
            Ok(())
        }
        ClientFrame::Toggle => session.toggle().await,
        ClientFrame::Ask { text } => {
            if !session.is_session_active() {
                if let Err(e) = session.start().await {
                    tracing::warn!(error = ?e, "could not start session for typed question");
                    return;
                }
            }
            session.send_text(&text).await
        }
        ClientFrame::NewConversation => {
            // Before the cleared transcript can reach the synchronizer.
            sync.reset();
            session.new_conversation().await
        }
    };
    if let Err(e) = result {
        tracing::warn!(error = ?e, "session command failed");
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, user: Option<AuthUser>) {
    info!("WebSocket connection established");

    let Some(chat) = state.chat.clone() else {
        let frame = ServerFrame::Status {
            status: VoiceStatus::Error,
            active: false,
            error: Some("live sessions are disabled on this server".into()),
        };
        send_frame(&mut socket, &frame).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let agent = ChatAgent::new(chat, state.prompts.assistant.clone());
    let session = VoiceSession::new(agent);
    let sync = TranscriptSynchronizer::new(state.store.clone(), state.titles.clone());
    let (outgoing, incoming) = socket.split();
    run_session(incoming, outgoing, session, sync, user).await;

    info!("WebSocket connection closed");
}

async fn run_session<A, R, W>(
    mut incoming: R,
    mut outgoing: W,
    mut session: VoiceSession<A>,
    sync: TranscriptSynchronizer,
    user: Option<AuthUser>,
) where
    A: VoiceAgent,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    W: Sink<Message> + Unpin,
{
    let mut transcript_rx = session.watch_transcript();
    let mut saved_rx = sync.subscribe();

    if !send_frame(&mut outgoing, &ServerFrame::status(&session)).await {
        return;
    }

    loop {
        let frame = tokio::select! {
            msg = incoming.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            handle_frame(frame, &mut session, &sync).await;
                            ServerFrame::status(&session)
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "ignoring malformed client frame");
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    info!("WebSocket error: {}", e);
                    break;
                }
            },
            _ = session.next_event() => ServerFrame::status(&session),
            changed = transcript_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let entries = transcript_rx.borrow_and_update().clone();
                if !entries.is_empty() {
                    sync.on_transcript_update(user.clone(), entries.clone());
                }
                ServerFrame::Transcript { entries }
            }
            changed = saved_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let watermark = *saved_rx.borrow_and_update();
                ServerFrame::saved(watermark)
            }
        };

        if !send_frame(&mut outgoing, &frame).await {
            break;
        }
    }

    session.stop().await;
}
