use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Transport, TransportError};
use crate::wire::{decode_frame, TransactionFrame, WireError, WireFrame};

/// Channel-backed transport for tests and demos.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::UnboundedSender<WireFrame>,
    failing: AtomicBool,
    stall: Mutex<Option<Duration>>,
    closed: Mutex<Option<String>>,
}

pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            inner: Arc::new(Inner {
                tx,
                failing: AtomicBool::new(false),
                stall: Mutex::new(None),
                closed: Mutex::new(None),
            }),
        };
        (transport, MemoryReceiver { rx })
    }

    /// Makes every following write fail.
    pub fn fail_writes(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every following write before delivering it.
    pub fn stall_writes(&self, stall: Option<Duration>) {
        *self.inner.stall.lock() = stall;
    }

    /// Reason passed to [`Transport::close`], once closed.
    pub fn close_reason(&self) -> Option<String> {
        self.inner.closed.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.lock().is_some()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn write(&self, frame: WireFrame) -> Result<(), TransportError> {
        let stall = *self.inner.stall.lock();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Write("injected failure".into()));
        }
        self.inner
            .tx
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, reason: &str) -> Result<(), TransportError> {
        let mut closed = self.inner.closed.lock();
        if closed.is_none() {
            *closed = Some(reason.to_string());
        }
        Ok(())
    }
}

impl MemoryReceiver {
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }

    /// Receives and decodes the next frame.
    pub async fn next_transaction(&mut self) -> Option<Result<TransactionFrame, WireError>> {
        let frame = self.rx.recv().await?;
        Some(decode_frame(&frame))
    }

    /// Decodes every frame already delivered.
    pub fn drain(&mut self) -> Result<Vec<TransactionFrame>, WireError> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(decode_frame(&frame)?);
        }
        Ok(frames)
    }
}
