use crate::error::{CallrelayError, Result};
use crate::transport::protocol::OutboundMessage;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Pluggable audio output for the call pipeline.
///
/// Every emission is followed by a delivery marker carrying a fresh unique
/// label, so the far end can acknowledge playback of that exact payload.
#[async_trait]
pub trait OutboundSink: Send + 'static {
    /// Write an ordered payload, then its marker. Returns the marker label.
    async fn emit(&mut self, payload: &Bytes) -> Result<String>;

    /// Write an announcement that bypasses ordering.
    async fn emit_out_of_band(&mut self, payload: &Bytes) -> Result<String> {
        self.emit(payload).await
    }

    /// Drop audio already written but not yet played by the far end.
    async fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Generates a fresh delivery marker label.
pub fn new_mark_label() -> String {
    Uuid::new_v4().to_string()
}

/// Sink that writes media-stream JSON frames to the WebSocket egress task.
pub struct MediaStreamSink {
    stream_sid: String,
    frames: mpsc::Sender<OutboundMessage>,
}

impl MediaStreamSink {
    pub fn new(stream_sid: impl Into<String>, frames: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            stream_sid: stream_sid.into(),
            frames,
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.frames
            .send(message)
            .await
            .map_err(|_| CallrelayError::Transport {
                message: format!("media stream {} is closed", self.stream_sid),
            })
    }
}

#[async_trait]
impl OutboundSink for MediaStreamSink {
    async fn emit(&mut self, payload: &Bytes) -> Result<String> {
        self.send(OutboundMessage::media(&self.stream_sid, payload))
            .await?;

        let label = new_mark_label();
        self.send(OutboundMessage::mark(&self.stream_sid, &label))
            .await?;
        Ok(label)
    }

    async fn clear(&mut self) -> Result<()> {
        self.send(OutboundMessage::clear(&self.stream_sid)).await
    }

    fn name(&self) -> &'static str {
        "media-stream"
    }
}

/// One payload observed by a [`CollectorSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub payload: Bytes,
    pub mark: String,
    pub out_of_band: bool,
}

/// Sink that records every emission in memory.
///
/// Clones share the same record, so a test can keep one handle while the
/// pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    emissions: Arc<Mutex<Vec<Emission>>>,
    clears: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the sink to fail once `count` payloads were written.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Snapshot of everything emitted so far.
    pub fn emissions(&self) -> Vec<Emission> {
        match self.emissions.lock() {
            Ok(emissions) => emissions.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of times playback was cleared.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Payloads emitted so far, in emission order.
    pub fn payloads(&self) -> Vec<Bytes> {
        self.emissions().into_iter().map(|e| e.payload).collect()
    }

    fn record(&mut self, payload: &Bytes, out_of_band: bool) -> Result<String> {
        let mut emissions = self
            .emissions
            .lock()
            .map_err(|_| CallrelayError::Other("collector sink poisoned".to_string()))?;

        if self.fail_after.is_some_and(|limit| emissions.len() >= limit) {
            return Err(CallrelayError::Transport {
                message: "collector sink closed".to_string(),
            });
        }

        let mark = new_mark_label();
        emissions.push(Emission {
            payload: payload.clone(),
            mark: mark.clone(),
            out_of_band,
        });
        Ok(mark)
    }
}

#[async_trait]
impl OutboundSink for CollectorSink {
    async fn emit(&mut self, payload: &Bytes) -> Result<String> {
        self.record(payload, false)
    }

    async fn emit_out_of_band(&mut self, payload: &Bytes) -> Result<String> {
        self.record(payload, true)
    }

    async fn clear(&mut self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}
