//! Per-session exclusive scope, transactional commit and the writer task.
//!
//! Every mutation of a session's tree runs inside [`Session::scope`]. When the
//! closure returns, the accumulated transaction is encoded into one frame and
//! queued for a single writer task, which hands frames to the transport one at
//! a time in commit order. Any delivery problem desynchronizes the session for
//! good.

use std::fmt;
use std::sync::{Arc, OnceLock};

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::context::UiContext;
use crate::error::{SyncError, SyncResult};
use crate::router::DispatchOutcome;
use crate::transport::{Transport, TransportError};
use crate::wire::{encode_frame, WireFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesyncCause {
    WriteFailed(TransportError),
    WriteTimeout,
    QueueFull,
    WriterStopped,
}

impl DesyncCause {
    pub fn label(&self) -> &'static str {
        match self {
            DesyncCause::WriteFailed(_) => "write_failed",
            DesyncCause::WriteTimeout => "write_timeout",
            DesyncCause::QueueFull => "queue_full",
            DesyncCause::WriterStopped => "writer_stopped",
        }
    }
}

impl fmt::Display for DesyncCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesyncCause::WriteFailed(err) => write!(f, "{err}"),
            DesyncCause::WriteTimeout => f.write_str("transport write exceeded deadline"),
            DesyncCause::QueueFull => f.write_str("outbound queue full"),
            DesyncCause::WriterStopped => f.write_str("writer task stopped"),
        }
    }
}

#[derive(Debug)]
enum TeardownState {
    Closed,
    Desynchronized(DesyncCause),
}

struct Teardown {
    session_id: Uuid,
    state: OnceLock<TeardownState>,
    notify: Notify,
    down: watch::Sender<bool>,
}

impl Teardown {
    /// First teardown wins; later causes are ignored.
    fn desynchronize(&self, cause: DesyncCause) {
        let label = cause.label();
        let reason = cause.to_string();
        if self.state.set(TeardownState::Desynchronized(cause)).is_ok() {
            warn!(session_id = %self.session_id, reason = %reason, "session desynchronized");
            counter!("sandcastle_sessions_desynchronized_total", 1, "reason" => label);
            self.notify.notify_one();
            self.down.send_replace(true);
        }
    }

    fn check(&self) -> SyncResult<()> {
        match self.state.get() {
            None => Ok(()),
            Some(TeardownState::Closed) => Err(SyncError::SessionClosed(self.session_id)),
            Some(TeardownState::Desynchronized(cause)) => Err(SyncError::Desynchronized {
                session: self.session_id,
                reason: cause.to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        match self.state.get() {
            None | Some(TeardownState::Closed) => "session closed".to_string(),
            Some(TeardownState::Desynchronized(cause)) => format!("desynchronized: {cause}"),
        }
    }
}

struct Outbound {
    seq: u64,
    frame: WireFrame,
    instructions: usize,
}

struct ScopeState {
    cx: UiContext,
    seq: u64,
    outbound: Option<mpsc::Sender<Outbound>>,
}

/// One remote runtime connection and the object tree mirrored to it.
pub struct Session {
    id: Uuid,
    config: SyncConfig,
    state: Mutex<ScopeState>,
    teardown: Arc<Teardown>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Creates the session and spawns its writer task on the current tokio
    /// runtime.
    pub fn new(id: Uuid, transport: Arc<dyn Transport>, config: SyncConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.outbound_depth);
        let teardown = Arc::new(Teardown {
            session_id: id,
            state: OnceLock::new(),
            notify: Notify::new(),
            down: watch::channel(false).0,
        });
        let writer = tokio::spawn(run_writer(
            transport,
            rx,
            teardown.clone(),
            config.clone(),
        ));
        debug!(session_id = %id, format = ?config.wire_format, "session opened");

        Arc::new(Self {
            id,
            state: Mutex::new(ScopeState {
                cx: UiContext::new(id),
                seq: 0,
                outbound: Some(tx),
            }),
            config,
            teardown,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs `f` while holding the session's exclusive scope, then commits.
    ///
    /// The transaction is committed even if `f` fails: the server-side tree
    /// already reflects the instructions `f` emitted before failing. A commit
    /// failure takes precedence over the closure's own result.
    pub fn scope<R>(&self, f: impl FnOnce(&mut UiContext) -> SyncResult<R>) -> SyncResult<R> {
        self.teardown.check()?;
        let mut state = self.state.lock();
        self.teardown.check()?;

        let result = f(&mut state.cx);
        self.commit(&mut state)?;
        result
    }

    /// Routes one inbound envelope and commits whatever the handlers emitted.
    pub fn dispatch(&self, raw: &str) -> SyncResult<DispatchOutcome> {
        self.scope(|cx| cx.dispatch(raw))
    }

    fn commit(&self, state: &mut ScopeState) -> SyncResult<()> {
        let txn = state.cx.take_transaction();
        if txn.is_empty() {
            return Ok(());
        }
        let Some(outbound) = state.outbound.as_ref() else {
            return Err(SyncError::SessionClosed(self.id));
        };

        let seq = state.seq + 1;
        let instructions = txn.len();
        let frame = encode_frame(self.config.wire_format, seq, txn.instructions());
        let bytes = frame.len();
        match outbound.try_send(Outbound {
            seq,
            frame,
            instructions,
        }) {
            Ok(()) => {
                state.seq = seq;
                trace!(session_id = %self.id, seq, instructions, bytes, "transaction committed");
                counter!("sandcastle_transactions_committed_total", 1);
                counter!("sandcastle_instructions_committed_total", instructions as u64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.teardown.desynchronize(DesyncCause::QueueFull);
                self.teardown.check()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.teardown.desynchronize(DesyncCause::WriterStopped);
                self.teardown.check()
            }
        }
    }

    /// Sequence number of the last committed transaction (0 before the first).
    pub fn committed_seq(&self) -> u64 {
        self.state.lock().seq
    }

    pub fn is_desynchronized(&self) -> bool {
        matches!(
            self.teardown.state.get(),
            Some(TeardownState::Desynchronized(_))
        )
    }

    pub fn is_live(&self) -> bool {
        self.teardown.state.get().is_none()
    }

    /// Stops accepting work. Frames already committed are still written
    /// before the transport is closed.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if self.teardown.state.set(TeardownState::Closed).is_ok() {
            debug!(session_id = %self.id, "session closing");
        }
        state.outbound = None;
        self.teardown.down.send_replace(true);
    }

    /// Resolves once the session is closed or desynchronized.
    pub async fn torn_down(&self) {
        let mut down = self.teardown.down.subscribe();
        let _ = down.wait_for(|down| *down).await;
    }

    /// Closes the session and waits for the writer task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(session_id = %self.id, error = %err, "session writer task failed");
            }
        }
    }
}

async fn run_writer(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<Outbound>,
    teardown: Arc<Teardown>,
    config: SyncConfig,
) {
    let session_id = teardown.session_id;
    loop {
        let next = tokio::select! {
            biased;
            _ = teardown.notify.notified() => None,
            item = rx.recv() => item,
        };
        let Some(item) = next else {
            break;
        };
        if matches!(
            teardown.state.get(),
            Some(TeardownState::Desynchronized(_))
        ) {
            break;
        }

        match tokio::time::timeout(config.write_deadline, transport.write(item.frame)).await {
            Ok(Ok(())) => {
                trace!(
                    session_id = %session_id,
                    seq = item.seq,
                    instructions = item.instructions,
                    "frame written"
                );
            }
            Ok(Err(err)) => {
                teardown.desynchronize(DesyncCause::WriteFailed(err));
                break;
            }
            Err(_) => {
                teardown.desynchronize(DesyncCause::WriteTimeout);
                break;
            }
        }
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    let reason = teardown.describe();
    match tokio::time::timeout(config.write_deadline, transport.close(&reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            debug!(session_id = %session_id, error = %err, "transport close failed");
        }
        Err(_) => {
            warn!(session_id = %session_id, "transport close exceeded deadline");
        }
    }
    debug!(session_id = %session_id, discarded, reason = %reason, "session writer stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{ServerToClientModel, WidgetKind, WindowId};
    use crate::object::ObjectSpec;
    use crate::transport::MemoryTransport;
    use crate::wire::{decode_frame, WireFormat};

    fn label(cx: &mut UiContext) -> SyncResult<crate::model::ObjectId> {
        let id = cx.create(ObjectSpec::new(WidgetKind::Label))?;
        cx.attach(id, WindowId::MAIN)?;
        Ok(id)
    }

    #[test_timeout::tokio_timeout_test]
    async fn scope_commits_one_frame_per_call() {
        let (transport, mut rx) = MemoryTransport::pair();
        let session = Session::new(Uuid::new_v4(), Arc::new(transport), SyncConfig::default());

        let id = session.scope(label).unwrap();
        session
            .scope(|cx| cx.update(id, ServerToClientModel::Text, "hi"))
            .unwrap();
        session.scope(|_| Ok(())).unwrap();
        assert_eq!(session.committed_seq(), 2);

        let first = rx.next_transaction().await.unwrap().unwrap();
        let second = rx.next_transaction().await.unwrap().unwrap();
        assert_eq!((first.seq, first.instructions.len()), (1, 1));
        assert_eq!((second.seq, second.instructions.len()), (2, 1));
    }

    #[test_timeout::tokio_timeout_test]
    async fn closure_errors_still_commit_emitted_instructions() {
        let (transport, mut rx) = MemoryTransport::pair();
        let session = Session::new(Uuid::new_v4(), Arc::new(transport), SyncConfig::default());

        let err = session
            .scope(|cx| {
                let id = label(cx)?;
                cx.send_to_native(id, serde_json::Value::Null)
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::IllegalState(_)));
        assert!(session.is_live());

        let frame = rx.next_transaction().await.unwrap().unwrap();
        assert_eq!(frame.instructions.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn write_failure_desynchronizes_and_closes_transport() {
        let (transport, _rx) = MemoryTransport::pair();
        transport.fail_writes(true);
        let session = Session::new(
            Uuid::new_v4(),
            Arc::new(transport.clone()),
            SyncConfig::default(),
        );

        session.scope(label).unwrap();
        while !transport.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(session.is_desynchronized());
        assert!(transport.close_reason().unwrap().starts_with("desynchronized"));
        let err = session.scope(label).unwrap_err();
        assert!(err.is_session_fatal());
        assert!(matches!(err, SyncError::Desynchronized { .. }));
    }

    #[test_timeout::tokio_timeout_test]
    async fn stalled_write_past_deadline_desynchronizes() {
        let (transport, mut rx) = MemoryTransport::pair();
        transport.stall_writes(Some(Duration::from_secs(30)));
        let config = SyncConfig {
            write_deadline: Duration::from_millis(20),
            ..SyncConfig::default()
        };
        let session = Session::new(Uuid::new_v4(), Arc::new(transport.clone()), config);

        session.scope(label).unwrap();
        while !transport.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(session.is_desynchronized());
        assert_eq!(
            transport.close_reason().as_deref(),
            Some("desynchronized: transport write exceeded deadline")
        );
        session.shutdown().await;
        assert!(rx.try_recv().is_none());
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl Transport for Stalled {
        async fn write(&self, _frame: WireFrame) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&self, _reason: &str) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn transport_that_never_completes_is_still_torn_down() {
        let config = SyncConfig {
            write_deadline: Duration::from_millis(20),
            ..SyncConfig::default()
        };
        let session = Session::new(Uuid::new_v4(), Arc::new(Stalled), config);

        session.scope(label).unwrap();
        tokio::time::timeout(Duration::from_secs(2), session.torn_down())
            .await
            .unwrap();
        assert!(session.is_desynchronized());
        tokio::time::timeout(Duration::from_secs(2), session.shutdown())
            .await
            .unwrap();
    }

    #[test_timeout::tokio_timeout_test]
    async fn torn_down_resolves_on_close() {
        let (transport, _rx) = MemoryTransport::pair();
        let session = Session::new(Uuid::new_v4(), Arc::new(transport), SyncConfig::default());
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.torn_down().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        session.close();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test_timeout::tokio_timeout_test]
    async fn full_queue_desynchronizes() {
        let (transport, _rx) = MemoryTransport::pair();
        transport.stall_writes(Some(Duration::from_secs(30)));
        let config = SyncConfig {
            outbound_depth: 1,
            ..SyncConfig::default()
        };
        let session = Session::new(Uuid::new_v4(), Arc::new(transport), config);

        let mut result = Ok(());
        for _ in 0..4 {
            result = session.scope(|cx| label(cx).map(|_| ()));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SyncError::Desynchronized { .. })));
        assert!(session.is_desynchronized());
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_flushes_committed_frames() {
        let (transport, mut rx) = MemoryTransport::pair();
        let config = SyncConfig {
            wire_format: WireFormat::Json,
            ..SyncConfig::default()
        };
        let session = Session::new(Uuid::new_v4(), Arc::new(transport.clone()), config);

        session.scope(label).unwrap();
        session.scope(label).unwrap();
        session.shutdown().await;

        let frames = rx.drain().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(transport.close_reason().as_deref(), Some("session closed"));
        assert_eq!(
            session.scope(label).unwrap_err(),
            SyncError::SessionClosed(session.id())
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn dispatch_commits_handler_output() {
        let (transport, mut rx) = MemoryTransport::pair();
        let session = Session::new(Uuid::new_v4(), Arc::new(transport), SyncConfig::default());

        let id = session
            .scope(|cx| {
                let id = label(cx)?;
                cx.add_native_handler(
                    id,
                    Box::new(|cx, event| {
                        cx.update(event.source(), ServerToClientModel::Text, "clicked")
                    }),
                )?;
                Ok(id)
            })
            .unwrap();
        let _ = rx.recv().await;

        let outcome = session
            .dispatch(&format!(r#"{{"0": {}, "4": {{"click": true}}}}"#, id.get()))
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Delivered { handlers: 1, .. }));

        let frame = decode_frame(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame.seq, 2);
        assert_eq!(
            frame.instructions[0].get(ServerToClientModel::Text),
            Some(&crate::model::Value::Str("clicked".into()))
        );
    }
}
