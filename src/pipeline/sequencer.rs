//! Sequencer station: restores reply order for asynchronously synthesized audio.
//!
//! Synthesis tasks finish in whatever order the backend answers. The
//! sequencer holds a low watermark (`next_expected`) and a sparse buffer of
//! early arrivals, and emits to the outbound sink strictly in sequence order:
//! - an arrival at the watermark is emitted and drains any contiguous run
//! - an arrival above it is buffered
//! - an arrival below it was already emitted (or skipped) and is discarded
//!
//! A segment whose synthesis failed never arrives. The dispatcher's
//! `TurnComplete` signal arms a grace deadline; when it expires the buffer is
//! flushed in order, skipping the gaps.

use crate::defaults;
use crate::error::Result;
use crate::pipeline::frame::{SequencerEvent, SynthesizedAudio, TurnId, TurnPhase, TurnStatus};
use crate::pipeline::sink::OutboundSink;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Low-watermark reorder buffer for one ordering domain (one turn).
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    next_expected: u64,
    pending: BTreeMap<u64, SynthesizedAudio>,
    last_emitted: Option<u64>,
}

/// Outcome of a forced flush.
#[derive(Debug, Default)]
pub struct Flush {
    /// Buffered audio, in ascending sequence order.
    pub emitted: Vec<SynthesizedAudio>,
    /// Sequence numbers given up on.
    pub skipped: Vec<u64>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number required before emission can proceed.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of early arrivals waiting for a gap to close.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accepts one arrival and returns everything now ready, in order.
    pub fn submit(&mut self, audio: SynthesizedAudio) -> Vec<SynthesizedAudio> {
        let sequence = audio.sequence;

        if sequence < self.next_expected {
            debug!(sequence, next_expected = self.next_expected, "discarding stale audio");
            return Vec::new();
        }

        if sequence > self.next_expected {
            if self.pending.contains_key(&sequence) {
                debug!(sequence, "discarding duplicate buffered audio");
            } else {
                self.pending.insert(sequence, audio);
            }
            return Vec::new();
        }

        let mut ready = vec![audio];
        self.next_expected += 1;
        while let Some(next) = self.pending.remove(&self.next_expected) {
            ready.push(next);
            self.next_expected += 1;
        }

        self.track_emitted(&ready);
        ready
    }

    /// Emits every buffered arrival in order, giving up on the gaps between.
    pub fn force_flush(&mut self) -> Flush {
        let emitted: Vec<SynthesizedAudio> = std::mem::take(&mut self.pending).into_values().collect();

        let mut skipped = Vec::new();
        let mut expected = self.next_expected;
        for audio in &emitted {
            skipped.extend(expected..audio.sequence);
            expected = audio.sequence + 1;
        }
        self.next_expected = expected;

        self.track_emitted(&emitted);
        Flush { emitted, skipped }
    }

    /// Whether all of `segment_count` segments have been emitted.
    pub fn delivered_all(&self, segment_count: u64) -> bool {
        self.next_expected >= segment_count && self.pending.is_empty()
    }

    /// Starts a fresh ordering domain. Returns how many buffered arrivals were dropped.
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        *self = Self::default();
        dropped
    }

    fn track_emitted(&mut self, emitted: &[SynthesizedAudio]) {
        for audio in emitted {
            debug_assert!(
                self.last_emitted.is_none_or(|last| audio.sequence > last),
                "sequencer emitted {} after {:?}",
                audio.sequence,
                self.last_emitted
            );
            self.last_emitted = Some(audio.sequence);
        }
    }
}

/// Configuration for the sequencer station.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Wait after `TurnComplete` before gaps are skipped.
    pub flush_grace: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            flush_grace: Duration::from_millis(defaults::FLUSH_GRACE_MS),
        }
    }
}

struct PendingCompletion {
    segment_count: u64,
    deadline: Instant,
}

/// Single-writer station owning the per-call ordering state.
pub struct SequencerStation {
    config: SequencerConfig,
    call_id: String,
    buffer: ReorderBuffer,
    current_turn: Option<TurnId>,
    turn_open: bool,
    completion: Option<PendingCompletion>,
    status: Option<Arc<watch::Sender<TurnStatus>>>,
}

impl SequencerStation {
    /// Creates a sequencer with default configuration.
    pub fn new(call_id: impl Into<String>) -> Self {
        Self::with_config(call_id, SequencerConfig::default())
    }

    /// Creates a sequencer with custom configuration.
    pub fn with_config(call_id: impl Into<String>, config: SequencerConfig) -> Self {
        Self {
            config,
            call_id: call_id.into(),
            buffer: ReorderBuffer::new(),
            current_turn: None,
            turn_open: false,
            completion: None,
            status: None,
        }
    }

    /// Publishes `Draining` / `Idle` transitions of the current turn.
    pub fn with_status(mut self, status: Arc<watch::Sender<TurnStatus>>) -> Self {
        self.status = Some(status);
        self
    }

    /// Runs the sequencer station.
    ///
    /// Returns when the input closes or `cancel` fires. A sink failure is
    /// returned as an error; the caller is expected to end the call.
    ///
    /// # Arguments
    /// * `input` - Events from the turn driver and synthesis tasks
    /// * `sink` - Outbound transport
    /// * `cancel` - Call-wide cancellation
    pub async fn run<S: OutboundSink>(
        mut self,
        mut input: mpsc::Receiver<SequencerEvent>,
        mut sink: S,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let deadline = self.completion.as_ref().map(|c| c.deadline);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = input.recv() => match event {
                    Some(event) => self.handle(event, &mut sink).await?,
                    None => break,
                },
                _ = wait_until(deadline) => self.flush_stalled(&mut sink).await?,
            }
        }

        let dropped = self.buffer.reset();
        if dropped > 0 {
            debug!(call = %self.call_id, dropped, "sequencer stopped with buffered audio");
        }
        Ok(())
    }

    /// Applies one event, writing any audio it releases to `sink`.
    pub async fn handle<S: OutboundSink>(
        &mut self,
        event: SequencerEvent,
        sink: &mut S,
    ) -> Result<()> {
        match event {
            SequencerEvent::TurnStarted(turn) => self.start_turn(turn, sink).await,
            SequencerEvent::Audio(audio) => {
                if Some(audio.turn) != self.current_turn {
                    debug!(
                        call = %self.call_id,
                        turn = audio.turn,
                        sequence = audio.sequence,
                        "discarding audio from an abandoned turn"
                    );
                    return Ok(());
                }
                let ready = self.buffer.submit(audio);
                self.emit_all(ready, sink).await?;
                self.check_completion();
                Ok(())
            }
            SequencerEvent::OutOfBand(payload) => {
                let mark = sink.emit_out_of_band(&payload).await?;
                debug!(call = %self.call_id, mark = %mark, bytes = payload.len(), "sent out-of-band audio");
                Ok(())
            }
            SequencerEvent::TurnComplete {
                turn,
                segment_count,
            } => {
                if Some(turn) != self.current_turn || !self.turn_open {
                    return Ok(());
                }
                if self.buffer.delivered_all(segment_count) {
                    self.finish_turn();
                } else {
                    self.completion = Some(PendingCompletion {
                        segment_count,
                        deadline: Instant::now() + self.config.flush_grace,
                    });
                    self.publish(TurnPhase::Draining);
                }
                Ok(())
            }
        }
    }

    /// Current ordering watermark, for diagnostics.
    pub fn next_expected(&self) -> u64 {
        self.buffer.next_expected()
    }

    async fn start_turn<S: OutboundSink>(&mut self, turn: TurnId, sink: &mut S) -> Result<()> {
        let abandoned = self.turn_open;
        if abandoned && let Some(previous) = self.current_turn {
            let dropped = self.buffer.pending_len();
            info!(
                call = %self.call_id,
                previous,
                turn,
                dropped,
                "abandoning unfinished turn"
            );
        }
        self.buffer.reset();
        self.current_turn = Some(turn);
        self.turn_open = true;
        self.completion = None;

        // Audio of the abandoned turn may still be queued at the far end.
        if abandoned {
            sink.clear().await?;
        }
        Ok(())
    }

    async fn flush_stalled<S: OutboundSink>(&mut self, sink: &mut S) -> Result<()> {
        let flush = self.buffer.force_flush();
        if !flush.skipped.is_empty() {
            warn!(
                call = %self.call_id,
                turn = ?self.current_turn,
                skipped = ?flush.skipped,
                "skipping segments that never arrived"
            );
        }
        self.emit_all(flush.emitted, sink).await?;
        self.finish_turn();
        Ok(())
    }

    async fn emit_all<S: OutboundSink>(
        &mut self,
        ready: Vec<SynthesizedAudio>,
        sink: &mut S,
    ) -> Result<()> {
        for audio in ready {
            let mark = sink.emit(&audio.payload).await?;
            debug!(
                call = %self.call_id,
                turn = audio.turn,
                sequence = audio.sequence,
                mark = %mark,
                text = %audio.source_text,
                "sent audio"
            );
        }
        Ok(())
    }

    fn check_completion(&mut self) {
        if let Some(completion) = &self.completion
            && self.buffer.delivered_all(completion.segment_count)
        {
            self.finish_turn();
        }
    }

    fn finish_turn(&mut self) {
        self.completion = None;
        self.turn_open = false;
        self.publish(TurnPhase::Idle);
    }

    fn publish(&self, phase: TurnPhase) {
        let (Some(status), Some(turn)) = (&self.status, self.current_turn) else {
            return;
        };
        status.send_if_modified(|current| {
            if current.turn == Some(turn) && current.phase != phase {
                current.phase = phase;
                true
            } else {
                false
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
