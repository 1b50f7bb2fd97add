//! `GET /ws`: interactive chat over a WebSocket.
//!
//! Protocol:
//! - Client → Server: `{ "type": "chat_request", "message": "...", "conversation_history": [...] }`
//! - Server → Client: `{ "event": "<name>", "data": {...} }` for every agent event,
//!   ending each request with `chat_response` or `error`
//!
//! Each connection owns one conversation; requests on it are answered one at a time,
//! each on its own task, while events stream back as they happen. A client-supplied
//! `conversation_history` only seeds a conversation that is still empty; after that
//! the server-side turns are authoritative.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dewey_agent::ChatSession;
use dewey_core::event::{AgentEvent, ChannelSink};
use dewey_core::message::{Conversation, Message};

use crate::SharedState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// WebSocket message from the client.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    conversation_history: Vec<HistoryTurn>,
}

/// Prior turn as the browser client keeps it.
#[derive(Debug, Deserialize)]
struct HistoryTurn {
    role: String,
    #[serde(default)]
    content: String,
}

/// A validated `chat_request`.
#[derive(Debug)]
struct ChatRequest {
    message: String,
    history: Vec<Message>,
}

/// Parse a client frame into the chat request it carries.
fn parse_client_frame(text: &str) -> Result<ChatRequest, String> {
    let frame: ClientFrame =
        serde_json::from_str(text).map_err(|e| format!("Invalid message: {e}"))?;
    if frame.frame_type != "chat_request" {
        return Err(format!("Unknown message type: '{}'", frame.frame_type));
    }
    if frame.message.trim().is_empty() {
        return Err("message must not be empty".into());
    }
    Ok(ChatRequest {
        message: frame.message,
        history: frame.conversation_history.into_iter().filter_map(history_message).collect(),
    })
}

/// Only user and assistant turns are accepted from the client.
fn history_message(turn: HistoryTurn) -> Option<Message> {
    match turn.role.as_str() {
        "user" => Some(Message::user(turn.content)),
        "assistant" => Some(Message::assistant(turn.content)),
        _ => None,
    }
}

fn seed_conversation(conversation: &mut Conversation, history: Vec<Message>) {
    if !conversation.is_empty() || history.is_empty() {
        return;
    }
    debug!(turns = history.len(), "Seeding conversation from client history");
    for message in history {
        conversation.push(message);
    }
}

fn event_frame(event: &AgentEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

fn rejection(message: String) -> AgentEvent {
    AgentEvent::Error {
        message,
        thinking_time: 0.0,
    }
}

async fn handle_ws_connection(socket: WebSocket, state: SharedState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let cancel = CancellationToken::new();
    let session = ChatSession::new(state.agent.clone()).with_cancellation(cancel.clone());
    let conversation = Arc::new(Mutex::new(Conversation::new()));
    let (sink, mut events) = ChannelSink::channel();
    info!("WebSocket connection established");

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue, // ignore binary, ping, pong
                };

                let request = match parse_client_frame(&text) {
                    Ok(request) => request,
                    Err(reason) => {
                        let frame = event_frame(&rejection(reason));
                        if ws_sender.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                // Requests on one connection take turns on the conversation lock.
                let session = session.clone();
                let conversation = conversation.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    let mut conversation = conversation.lock().await;
                    seed_conversation(&mut conversation, request.history);
                    let _ = session.respond(&request.message, &mut conversation, &sink).await;
                });
            }
            Some(event) = events.recv() => {
                debug!(event = event.event_type(), "Streaming event");
                if ws_sender.send(WsMessage::Text(event_frame(&event).into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Do not start further iterations for a client that left.
    cancel.cancel();
    info!("WebSocket connection closed");
}
