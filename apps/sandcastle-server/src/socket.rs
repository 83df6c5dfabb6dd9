use std::{borrow::Cow, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use sandcastle_core::{DispatchOutcome, Session, Transport, TransportError, WireFrame};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{app::Push, routes::AppState};

const SOCKET_CHANNEL_DEPTH: usize = 64;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// RFC 6455 caps close reasons at 123 bytes.
const MAX_CLOSE_REASON: usize = 123;

/// Feeds committed frames to the socket writer task.
pub struct WebSocketTransport {
    outbound: mpsc::Sender<Message>,
}

impl WebSocketTransport {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn write(&self, frame: WireFrame) -> Result<(), TransportError> {
        let message = match frame {
            WireFrame::Binary(bytes) => Message::Binary(bytes.to_vec()),
            WireFrame::Text(text) => Message::Text(text),
        };
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, reason: &str) -> Result<(), TransportError> {
        let code = if reason.starts_with("desynchronized") {
            close_code::ERROR
        } else {
            close_code::NORMAL
        };
        let frame = CloseFrame {
            code,
            reason: Cow::Owned(truncate_reason(reason).to_string()),
        };
        // The socket writer may be wedged behind a full backlog; never wait on it.
        self.outbound
            .try_send(Message::Close(Some(frame)))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::Write("socket backlog full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(SOCKET_CHANNEL_DEPTH);

    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        debug!(session_id = %session_id, "socket writer finished");
    });

    let session = Session::new(
        session_id,
        Arc::new(WebSocketTransport::new(tx)),
        state.sync.clone(),
    );
    state.sessions.register(Arc::clone(&session));
    counter!("sandcastle_connections_total", 1);
    info!(session_id = %session_id, application = state.app.name(), "session opened");

    let mut writer_finished = false;
    let mut ticker = None;
    match session.scope(|cx| state.app.start(cx)) {
        Ok(push) => {
            ticker = push.map(|push| spawn_ticker(Arc::clone(&session), push));
            loop {
                tokio::select! {
                    message = ws_rx.next() => {
                        let Some(message) = message else { break };
                        match message {
                            Ok(Message::Text(text)) => {
                                if !handle_text(&session, &text) {
                                    break;
                                }
                            }
                            Ok(Message::Binary(bytes)) => {
                                debug!(session_id = %session_id, len = bytes.len(), "ignoring binary frame from client");
                            }
                            Ok(Message::Close(frame)) => {
                                info!(
                                    session_id = %session_id,
                                    reason = ?frame.map(|f| f.reason.to_string()),
                                    "client closed websocket"
                                );
                                break;
                            }
                            Ok(_) => continue,
                            Err(err) => {
                                warn!(session_id = %session_id, error = %err, "error receiving message");
                                break;
                            }
                        }
                    }
                    _ = &mut writer => {
                        writer_finished = true;
                        break;
                    }
                    _ = session.torn_down() => {
                        debug!(session_id = %session_id, "session torn down; leaving read loop");
                        break;
                    }
                }
            }
        }
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "application failed to start");
        }
    }

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    session.shutdown().await;
    state.sessions.unregister(session_id);
    drop(session);

    if !writer_finished && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        warn!(session_id = %session_id, "socket writer did not drain in time");
        writer.abort();
    }
    counter!("sandcastle_connections_closed_total", 1);
    info!(session_id = %session_id, "session closed");
}

/// Routes one inbound envelope. Returns `false` once the session is unusable.
fn handle_text(session: &Session, text: &str) -> bool {
    match session.dispatch(text) {
        Ok(DispatchOutcome::Rejected(err)) => {
            debug!(session_id = %session.id(), error = %err, "envelope rejected");
            true
        }
        Ok(outcome) => {
            trace!(session_id = %session.id(), outcome = ?outcome, "envelope handled");
            true
        }
        Err(err) if err.is_session_fatal() => {
            warn!(session_id = %session.id(), error = %err, "session no longer accepts events");
            false
        }
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "event handler failed");
            true
        }
    }
}

fn spawn_ticker(session: Arc<Session>, mut push: Box<dyn Push>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = push.interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            match session.scope(|cx| push.tick(cx)) {
                Ok(()) => {}
                Err(err) if err.is_session_fatal() => {
                    debug!(session_id = %session.id(), error = %err, "push stopped");
                    break;
                }
                Err(err) => {
                    warn!(session_id = %session.id(), error = %err, "push tick failed");
                }
            }
        }
    })
}
