//! Realtime channel endpoint.
//!
//! Clients subscribe to named channels (`messages:<user>:<conversation>`,
//! `conversations:<user>`) and receive the store mutation events published on
//! the in-process bus. Lifecycle: the server reports `open` right after a
//! successful upgrade and `closed` is implied by the socket closing; a bad
//! api key closes with 4001 before any event flows.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::core::security::{caller_user_id, require_api_key};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct WsCommand {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authed = require_api_key(&headers, &state.session_token).is_ok();
    let user_id = caller_user_id(&headers);

    ws.on_upgrade(move |socket| handle_socket(socket, state, authed, user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, authed: bool, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    if !authed {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4001,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    }

    let _ = sender
        .send(Message::Text(
            json!({"type": "status", "state": "open"}).to_string(),
        ))
        .await;

    let mut bus_rx = state.bus.subscribe();
    let mut subscriptions: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(command) = serde_json::from_str::<WsCommand>(&text) else {
                            continue;
                        };
                        handle_command(&mut sender, &mut subscriptions, &user_id, command).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = bus_rx.recv() => {
                match event {
                    Ok(event) if subscriptions.contains(&event.channel) => {
                        let payload = json!({
                            "type": "event",
                            "channel": event.channel,
                            "event": event.event,
                            "payload": event.payload,
                        });
                        if sender.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Realtime subscriber lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    // Subscriptions die with the socket; nothing else to tear down.
}

async fn handle_command(
    sender: &mut (impl SinkExt<Message> + Unpin),
    subscriptions: &mut HashSet<String>,
    user_id: &str,
    command: WsCommand,
) {
    let Some(channel) = command.channel else {
        return;
    };

    match command.kind.as_str() {
        "subscribe" => {
            if channel_belongs_to(&channel, user_id) {
                subscriptions.insert(channel.clone());
                let _ = sender
                    .send(Message::Text(
                        json!({"type": "subscribed", "channel": channel}).to_string(),
                    ))
                    .await;
            } else {
                let _ = sender
                    .send(Message::Text(
                        json!({
                            "type": "error",
                            "message": format!("channel {channel} is not yours"),
                        })
                        .to_string(),
                    ))
                    .await;
            }
        }
        "unsubscribe" => {
            subscriptions.remove(&channel);
        }
        _ => {}
    }
}

/// A caller may only watch channels carrying their own user id.
fn channel_belongs_to(channel: &str, user_id: &str) -> bool {
    match channel.split(':').collect::<Vec<_>>().as_slice() {
        ["messages", user, _conversation] => *user == user_id,
        ["conversations", user] => *user == user_id,
        _ => false,
    }
}
