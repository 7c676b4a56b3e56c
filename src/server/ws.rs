//! Observer channel: every connection is one scan session plus a filtered
//! subscription to the hub's event stream.

use crate::classification::Strategy;
use crate::error::HubError;
use crate::events::EventFilter;
use crate::session::{FrameRejection, ScanOutcome, SessionState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::ServerState;

const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Comma-separated event types to forward; all when absent
    pub events: Option<String>,
}

/// Messages accepted from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ControlMessage {
    StartScanning,
    StopScanning,
    Frame {
        #[serde(alias = "image")]
        image_base64: String,
        #[serde(default)]
        strategy: Option<Strategy>,
        #[serde(default)]
        fallback: Option<bool>,
    },
}

/// Replies sent for control messages, next to forwarded hub events
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ControlReply {
    SessionState { state: SessionState },
    ScanOutcome { outcome: ScanOutcome },
    Lagged { missed: u64 },
    Error { message: String },
}

impl ControlReply {
    fn into_message(self) -> Option<Message> {
        match serde_json::to_string(&self) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                warn!("Failed to serialize reply: {}", e);
                None
            }
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    let filter = EventFilter::parse(query.events.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: ServerState, filter: EventFilter) {
    let session_id = Uuid::new_v4().to_string();
    state.connections.connected();
    info!("Observer {} connected", session_id);

    // Sessions opened over the socket wait for `start_scanning`
    state.sessions.start(Some(session_id.clone()));
    let _ = state.sessions.stop(&session_id);

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut observer = state
        .sessions
        .pipeline()
        .hub()
        .subscribe(filter, format!("ws-{}", session_id));
    let events = outbound.clone();
    let connections = state.connections.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            let message = match observer.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!("Failed to serialize {}: {}", event.event_type(), e);
                        continue;
                    }
                },
                Err(HubError::Lagged { missed }) => {
                    match (ControlReply::Lagged { missed }).into_message() {
                        Some(message) => message,
                        None => continue,
                    }
                }
                Err(e) => {
                    debug!("Observer {} stopped: {}", observer.name(), e);
                    break;
                }
            };

            if events.send(message).await.is_err() {
                debug!("{} ({})", HubError::ObserverDisconnected, observer.name());
                break;
            }
            connections.record_event();
        }
    });

    let frame_slot = Arc::new(Semaphore::new(1));
    loop {
        let incoming = tokio::select! {
            incoming = stream.next() => incoming,
            _ = state.shutdown.cancelled() => break,
        };
        let Some(incoming) = incoming else {
            break;
        };
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Observer {} socket error: {}", session_id, e);
                break;
            }
        };

        match serde_json::from_str::<ControlMessage>(&text) {
            Ok(ControlMessage::Frame {
                image_base64,
                strategy,
                fallback,
            }) => {
                state.connections.record_frame();
                // At most one frame task per connection; the rest are refused
                // as busy here, before anything is decoded.
                let Ok(permit) = Arc::clone(&frame_slot).try_acquire_owned() else {
                    let reply = busy_reply(&state, &session_id);
                    if let Some(message) = reply.into_message() {
                        if outbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    continue;
                };
                let state = state.clone();
                let session_id = session_id.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let reply = scan_frame(&state, &session_id, image_base64, strategy, fallback).await;
                    drop(permit);
                    if let Some(message) = reply.into_message() {
                        let _ = outbound.send(message).await;
                    }
                });
            }
            Ok(control) => {
                let reply = apply_control(&state, &session_id, control);
                if let Some(message) = reply.into_message() {
                    if outbound.send(message).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                state.connections.record_error();
                let reply = ControlReply::Error {
                    message: format!("Unrecognized message: {}", e),
                };
                if let Some(message) = reply.into_message() {
                    if outbound.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    forwarder.abort();
    if let Err(e) = state.sessions.end(&session_id) {
        debug!("Observer {} had no session to end: {}", session_id, e);
    }
    drop(outbound);
    writer.abort();
    state.connections.disconnected();
    info!("Observer {} disconnected", session_id);
}

fn apply_control(state: &ServerState, session_id: &str, control: ControlMessage) -> ControlReply {
    let result = match control {
        ControlMessage::StartScanning => Ok(state.sessions.start(Some(session_id.to_string()))),
        ControlMessage::StopScanning => state.sessions.stop(session_id),
        ControlMessage::Frame { .. } => {
            return ControlReply::Error {
                message: "frames are scanned asynchronously".to_string(),
            }
        }
    };

    match result {
        Ok(session) => ControlReply::SessionState { state: session },
        Err(e) => ControlReply::Error {
            message: e.to_string(),
        },
    }
}

fn busy_reply(state: &ServerState, session_id: &str) -> ControlReply {
    match state.sessions.state(session_id) {
        Ok(session) => ControlReply::ScanOutcome {
            outcome: ScanOutcome::Rejected {
                reason: FrameRejection::Busy,
                phase: session.phase,
            },
        },
        Err(e) => ControlReply::Error {
            message: e.to_string(),
        },
    }
}

async fn scan_frame(
    state: &ServerState,
    session_id: &str,
    payload: String,
    strategy: Option<Strategy>,
    fallback: Option<bool>,
) -> ControlReply {
    match state
        .sessions
        .submit_payload(session_id, payload, strategy, fallback)
        .await
    {
        Ok(outcome) => ControlReply::ScanOutcome { outcome },
        Err(e) => {
            state.connections.record_error();
            ControlReply::Error {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_messages_parse() {
        let start: ControlMessage = serde_json::from_str(r#"{"type":"start_scanning"}"#).unwrap();
        assert!(matches!(start, ControlMessage::StartScanning));

        let frame: ControlMessage =
            serde_json::from_str(r#"{"type":"frame","image":"abc","strategy":"LLM"}"#).unwrap();
        match frame {
            ControlMessage::Frame {
                image_base64,
                strategy,
                fallback,
            } => {
                assert_eq!(image_base64, "abc");
                assert_eq!(strategy, Some(Strategy::Llm));
                assert_eq!(fallback, None);
            }
            other => panic!("unexpected message {:?}", other),
        }

        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_replies_are_tagged() {
        let reply = ControlReply::Lagged { missed: 3 };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "lagged");
        assert_eq!(value["missed"], 3);
    }
}
