use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// A live, per-user push channel (usually one WebSocket)
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn send(&self, payload: &Value) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Channel backed by an unbounded tokio mpsc sender.
///
/// The embedding WebSocket task owns the receiver and forwards frames to the
/// socket; dropping the receiver makes every later send fail.
#[derive(Debug)]
pub struct MpscChannel {
    tx: mpsc::UnboundedSender<Value>,
    closed: AtomicBool,
}

impl MpscChannel {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

#[async_trait]
impl RealtimeChannel for MpscChannel {
    async fn send(&self, payload: &Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("channel closed");
        }
        if self.tx.send(payload.clone()).is_err() {
            bail!("receiver dropped");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
