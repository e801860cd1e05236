//! WebSocket upgrade and per-connection handler. Clients only listen; the
//! read half is drained to notice when they leave.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::session::{open_session, MessageSink, SinkError};
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Write half of an upgraded socket.
pub struct WsSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
    open: Arc<AtomicBool>,
}

impl WsSink {
    fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self {
            tx: Mutex::new(tx),
            open: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MessageSink for WsSink {
    fn is_ready(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: String) -> Result<(), SinkError> {
        if !self.is_ready() {
            return Err(SinkError::Closed);
        }
        let mut tx = self.tx.lock().await;
        tx.send(Message::Text(text))
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (tx, mut rx) = socket.split();
    let sink = WsSink::new(tx);
    let open = sink.open.clone();
    let mut session = open_session(
        sink,
        state.builder.clone(),
        state.config.interval,
        peer.to_string(),
    );

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%peer, "connection error: {e}");
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    session.close().await;
}
