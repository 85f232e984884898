//! Synthesis dispatcher station.
//!
//! Fans the segments of a turn out to the speech synthesizer, one task per
//! segment, bounded by a semaphore. Results are forwarded to the sequencer in
//! completion order; failed segments are logged and dropped.

use crate::backend::SpeechSynthesizer;
use crate::defaults;
use crate::error::{CallrelayError, Result};
use crate::pipeline::frame::{Segment, SequencerEvent, SynthesizedAudio, TurnId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of dispatching one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Audio forwarded to the sequencer.
    pub delivered: u64,
    /// Segments whose synthesis failed or timed out.
    pub failed: u64,
    /// Whether the call or turn was cancelled before every task settled.
    pub cancelled: bool,
}

/// Bounded-concurrency fan-out of synthesis requests.
pub struct SynthesisDispatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl SynthesisDispatcher {
    /// Creates a dispatcher allowing `max_concurrent` requests in flight.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            synthesizer,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Creates a dispatcher with default limits.
    pub fn with_defaults(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self::new(
            synthesizer,
            defaults::MAX_CONCURRENT_SYNTHESIS,
            Duration::from_millis(defaults::SYNTHESIS_TIMEOUT_MS),
        )
    }

    /// Synthesizes a single segment, bounded by the request timeout.
    pub async fn synthesize(&self, segment: &Segment) -> Result<SynthesizedAudio> {
        synthesize_segment(self.synthesizer.as_ref(), segment, self.timeout).await
    }

    /// Synthesizes every segment of a turn and forwards results to `output`.
    ///
    /// Returns once every task has settled, after sending
    /// [`SequencerEvent::TurnComplete`]. If `cancel` fires first, outstanding
    /// tasks are aborted and no completion is sent.
    pub async fn dispatch_turn(
        &self,
        turn: TurnId,
        segments: Vec<Segment>,
        output: &mpsc::Sender<SequencerEvent>,
        cancel: &CancellationToken,
    ) -> DispatchSummary {
        let segment_count = segments.len() as u64;
        let mut summary = DispatchSummary::default();
        let mut tasks = JoinSet::new();

        for segment in segments {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let synthesizer = self.synthesizer.clone();
            let timeout = self.timeout;
            let output = output.clone();

            tasks.spawn(async move {
                let _permit = permit; // Hold permit until done
                let sequence = segment.sequence;
                match synthesize_segment(synthesizer.as_ref(), &segment, timeout).await {
                    Ok(audio) => output.send(SequencerEvent::Audio(audio)).await.is_ok(),
                    Err(e) => {
                        warn!(turn, sequence, text = %segment.text, error = %e, "segment synthesis failed");
                        false
                    }
                }
            });
        }

        while !summary.cancelled {
            tokio::select! {
                _ = cancel.cancelled() => summary.cancelled = true,
                joined = tasks.join_next() => match joined {
                    Some(Ok(true)) => summary.delivered += 1,
                    Some(Ok(false)) => summary.failed += 1,
                    Some(Err(e)) => {
                        warn!(turn, error = %e, "synthesis task panicked");
                        summary.failed += 1;
                    }
                    None => break,
                },
            }
        }

        if summary.cancelled {
            tasks.abort_all();
            debug!(turn, "dispatch cancelled");
            return summary;
        }

        if output
            .send(SequencerEvent::TurnComplete {
                turn,
                segment_count,
            })
            .await
            .is_err()
        {
            debug!(turn, "sequencer gone before turn completion");
        }

        debug!(
            turn,
            delivered = summary.delivered,
            failed = summary.failed,
            "turn dispatched"
        );
        summary
    }
}

async fn synthesize_segment(
    synthesizer: &dyn SpeechSynthesizer,
    segment: &Segment,
    timeout: Duration,
) -> Result<SynthesizedAudio> {
    let payload = tokio::time::timeout(timeout, synthesizer.synthesize(&segment.text))
        .await
        .map_err(|_| CallrelayError::SynthesisTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;
    Ok(SynthesizedAudio::for_segment(segment, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockSynthesizer;
    use crate::pipeline::segmenter::Segmenter;

    fn dispatcher(synthesizer: MockSynthesizer, max_concurrent: usize) -> SynthesisDispatcher {
        SynthesisDispatcher::new(Arc::new(synthesizer), max_concurrent, Duration::from_secs(1))
    }

    async fn drain(rx: &mut mpsc::Receiver<SequencerEvent>) -> Vec<SequencerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn audio_sequences(events: &[SequencerEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                SequencerEvent::Audio(audio) => Some(audio.sequence),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let synthesizer = MockSynthesizer::new()
            .with_delay("first", Duration::from_millis(300))
            .with_delay("second", Duration::from_millis(100));
        let dispatcher = dispatcher(synthesizer, 4);
        let segments = Segmenter::default().segment(1, "first• second");
        let (tx, mut rx) = mpsc::channel(16);

        let summary = dispatcher
            .dispatch_turn(1, segments, &tx, &CancellationToken::new())
            .await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 0);

        let events = drain(&mut rx).await;
        assert_eq!(audio_sequences(&events), vec![1, 0]);
        assert_eq!(
            events.last(),
            Some(&SequencerEvent::TurnComplete {
                turn: 1,
                segment_count: 2
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_segment_is_dropped() {
        let synthesizer = MockSynthesizer::new().with_failure("broken");
        let dispatcher = dispatcher(synthesizer, 4);
        let segments = Segmenter::default().segment(1, "ok• broken• fine");
        let (tx, mut rx) = mpsc::channel(16);

        let summary = dispatcher
            .dispatch_turn(1, segments, &tx, &CancellationToken::new())
            .await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed, 1);

        let mut sequences = audio_sequences(&drain(&mut rx).await);
        sequences.sort();
        assert_eq!(sequences, vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let synthesizer = MockSynthesizer::new().with_delay("stuck", Duration::from_secs(60));
        let dispatcher =
            SynthesisDispatcher::new(Arc::new(synthesizer), 2, Duration::from_millis(500));

        let segment = Segment {
            turn: 1,
            sequence: 0,
            text: "stuck".to_string(),
        };
        let err = dispatcher.synthesize(&segment).await.unwrap_err();
        assert!(matches!(
            err,
            CallrelayError::SynthesisTimeout { timeout_ms: 500 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let synthesizer = MockSynthesizer::new().with_default_delay(Duration::from_millis(100));
        let dispatcher = dispatcher(synthesizer, 2);
        let segments = Segmenter::default().segment(1, "a•b•c•d");
        let (tx, _rx) = mpsc::channel(16);

        let start = tokio::time::Instant::now();
        let summary = dispatcher
            .dispatch_turn(1, segments, &tx, &CancellationToken::new())
            .await;

        assert_eq!(summary.delivered, 4);
        // Two waves of two requests each.
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_turn_completes_immediately() {
        let dispatcher = dispatcher(MockSynthesizer::new(), 4);
        let (tx, mut rx) = mpsc::channel(4);

        let summary = dispatcher
            .dispatch_turn(7, Vec::new(), &tx, &CancellationToken::new())
            .await;

        assert_eq!(summary, DispatchSummary::default());
        assert_eq!(
            drain(&mut rx).await,
            vec![SequencerEvent::TurnComplete {
                turn: 7,
                segment_count: 0
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_without_completion() {
        let synthesizer = MockSynthesizer::new().with_default_delay(Duration::from_secs(5));
        let dispatcher = dispatcher(synthesizer, 4);
        let segments = Segmenter::default().segment(1, "a•b");
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let summary = dispatcher.dispatch_turn(1, segments, &tx, &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.delivered, 0);
        assert!(drain(&mut rx).await.is_empty());
    }
}
