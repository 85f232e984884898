//! Call pipeline that runs from call start until call end.

use crate::backend::{Conversation, ReplyGenerator, SpeechSynthesizer};
use crate::config::Config;
use crate::defaults;
use crate::error::{CallrelayError, Result};
use crate::pipeline::dispatcher::SynthesisDispatcher;
use crate::pipeline::frame::{TurnId, TurnPhase, TurnStatus};
use crate::pipeline::segmenter::Segmenter;
use crate::pipeline::sequencer::{SequencerConfig, SequencerStation};
use crate::pipeline::session::{CallSession, TurnCommand};
use crate::pipeline::sink::OutboundSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Configuration for the call pipeline.
#[derive(Debug, Clone)]
pub struct CallPipelineConfig {
    /// Segment boundary marker in generated replies
    pub segment_marker: char,
    /// Synthesis requests in flight per call
    pub max_concurrent_synthesis: usize,
    /// Upper bound for one synthesis request
    pub synthesis_timeout: Duration,
    /// Wait after the last synthesis settles before gaps are skipped
    pub flush_grace: Duration,
    /// Sequencer input queue size
    pub channel_buffer_size: usize,
    /// First message of every conversation
    pub system_prompt: String,
}

impl Default for CallPipelineConfig {
    fn default() -> Self {
        Self {
            segment_marker: defaults::SEGMENT_MARKER,
            max_concurrent_synthesis: defaults::MAX_CONCURRENT_SYNTHESIS,
            synthesis_timeout: Duration::from_millis(defaults::SYNTHESIS_TIMEOUT_MS),
            flush_grace: Duration::from_millis(defaults::FLUSH_GRACE_MS),
            channel_buffer_size: defaults::CHANNEL_BUFFER_SIZE,
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
        }
    }
}

impl CallPipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            segment_marker: config.pipeline.segment_marker,
            max_concurrent_synthesis: config.pipeline.max_concurrent_synthesis,
            synthesis_timeout: config.pipeline.synthesis_timeout(),
            flush_grace: config.pipeline.flush_grace(),
            channel_buffer_size: config.pipeline.channel_buffer_size,
            system_prompt: config.llm.system_prompt.clone(),
        }
    }
}

/// Handle to a running call pipeline.
pub struct CallHandle {
    call_id: String,
    commands: mpsc::Sender<TurnCommand>,
    status: watch::Receiver<TurnStatus>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
    sequencer: JoinHandle<Result<()>>,
}

impl CallHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Starts a new turn for a finalized transcript and returns its id.
    ///
    /// A turn still in progress is abandoned. Ids are assigned by the turn
    /// driver, so they follow the order in which turns actually start.
    pub async fn on_final_transcript(&self, text: impl Into<String>) -> Result<TurnId> {
        let (started, turn) = oneshot::channel();
        self.send(TurnCommand::Transcript {
            text: text.into(),
            started,
        })
        .await?;
        turn.await.map_err(|_| self.stopped())
    }

    /// Synthesizes `text` and plays it immediately, outside of turn ordering.
    pub async fn announce(&self, text: impl Into<String>) -> Result<()> {
        self.send(TurnCommand::Announce(text.into())).await
    }

    /// Current turn and phase.
    pub fn status(&self) -> TurnStatus {
        *self.status.borrow()
    }

    /// Phase of the current turn.
    pub fn phase(&self) -> TurnPhase {
        self.status.borrow().phase
    }

    /// Watch channel over the call's turn status.
    pub fn subscribe(&self) -> watch::Receiver<TurnStatus> {
        self.status.clone()
    }

    /// Waits until `turn` has been fully delivered, or superseded by a newer turn.
    pub async fn wait_for_turn(&self, turn: TurnId) -> Result<()> {
        let mut status = self.status.clone();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(self.stopped()),
            result = status.wait_for(|s| s.is_finished(turn)) => {
                result.map(|_| ()).map_err(|_| self.stopped())
            }
        }
    }

    /// Resolves once the call pipeline has shut down, for whatever reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Returns true if the pipeline is running.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.sequencer.is_finished()
    }

    /// Stops the call pipeline and waits for its tasks.
    ///
    /// Buffered and in-flight audio is dropped. Returns the sequencer's
    /// transport failure if that is what ended the call.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();

        if let Err(e) = self.driver.await {
            error!(call = %self.call_id, error = %e, "turn driver panicked");
        }

        let result = match self.sequencer.await {
            Ok(result) => result,
            Err(e) => Err(CallrelayError::Other(format!("sequencer task failed: {}", e))),
        };

        info!(call = %self.call_id, "call pipeline stopped");
        result
    }

    async fn send(&self, command: TurnCommand) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.stopped());
        }
        self.commands.send(command).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> CallrelayError {
        CallrelayError::Transport {
            message: format!("call {} is no longer running", self.call_id),
        }
    }
}

/// Per-call pipeline: transcript → generator → segmenter → dispatcher → sequencer → sink.
///
/// One `CallPipeline` serves many calls; every [`start`](Self::start) builds an
/// independent set of stations with its own ordering state.
pub struct CallPipeline {
    config: CallPipelineConfig,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl CallPipeline {
    pub fn new(
        config: CallPipelineConfig,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            config,
            generator,
            synthesizer,
        }
    }

    pub fn config(&self) -> &CallPipelineConfig {
        &self.config
    }

    /// Starts the pipeline of one call.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `call_id` - Identifier used in logs
    /// * `sink` - Outbound transport of this call
    pub fn start<S: OutboundSink>(&self, call_id: impl Into<String>, sink: S) -> CallHandle {
        let call_id = call_id.into();
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(TurnStatus::default());
        let status = Arc::new(status_tx);
        let (events_tx, events_rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let (commands_tx, commands_rx) = mpsc::channel(self.config.channel_buffer_size.max(1));

        info!(
            call = %call_id,
            sink = sink.name(),
            generator = self.generator.name(),
            synthesizer = self.synthesizer.name(),
            "call pipeline started"
        );

        let station = SequencerStation::with_config(
            call_id.clone(),
            SequencerConfig {
                flush_grace: self.config.flush_grace,
            },
        )
        .with_status(status.clone());
        let sequencer_cancel = cancel.clone();
        let sequencer_call = call_id.clone();
        let sequencer = tokio::spawn(async move {
            let result = station
                .run(events_rx, sink, sequencer_cancel.clone())
                .await;
            if let Err(e) = &result {
                error!(call = %sequencer_call, error = %e, "outbound transport failed, ending call");
                sequencer_cancel.cancel();
            }
            result
        });

        let dispatcher = Arc::new(SynthesisDispatcher::new(
            self.synthesizer.clone(),
            self.config.max_concurrent_synthesis,
            self.config.synthesis_timeout,
        ));
        let session = CallSession::new(
            &call_id,
            self.generator.clone(),
            self.synthesizer.clone(),
            dispatcher,
            Segmenter::new(self.config.segment_marker),
            Conversation::new(&self.config.system_prompt),
            events_tx,
            status,
            self.config.synthesis_timeout,
            cancel.clone(),
        );
        let driver = tokio::spawn(session.run(commands_rx));

        CallHandle {
            call_id,
            commands: commands_tx,
            status: status_rx,
            cancel,
            driver,
            sequencer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockReplyGenerator, MockSynthesizer};
    use crate::pipeline::sink::CollectorSink;

    fn pipeline(generator: MockReplyGenerator, synthesizer: MockSynthesizer) -> CallPipeline {
        CallPipeline::new(
            CallPipelineConfig::default(),
            Arc::new(generator),
            Arc::new(synthesizer),
        )
    }

    #[test]
    fn test_config_from_file_config() {
        let mut config = Config::default();
        config.pipeline.segment_marker = '|';
        config.pipeline.max_concurrent_synthesis = 2;
        config.pipeline.flush_grace_ms = 50;
        config.llm.system_prompt = "Be brief.".to_string();

        let pipeline_config = CallPipelineConfig::from_config(&config);
        assert_eq!(pipeline_config.segment_marker, '|');
        assert_eq!(pipeline_config.max_concurrent_synthesis, 2);
        assert_eq!(pipeline_config.flush_grace, Duration::from_millis(50));
        assert_eq!(pipeline_config.system_prompt, "Be brief.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_ids_increase_per_call() {
        let pipeline = pipeline(MockReplyGenerator::new(), MockSynthesizer::new());
        let handle = pipeline.start("CA1", CollectorSink::new());

        assert_eq!(handle.on_final_transcript("one").await.unwrap(), 1);
        assert_eq!(handle.on_final_transcript("two").await.unwrap(), 2);
        handle.wait_for_turn(2).await.unwrap();

        let other = pipeline.start("CA2", CollectorSink::new());
        assert_eq!(other.on_final_transcript("one").await.unwrap(), 1);

        handle.stop().await.unwrap();
        other.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transcripts_latest_turn_is_current() {
        let pipeline = pipeline(MockReplyGenerator::new(), MockSynthesizer::new());
        let handle = Arc::new(pipeline.start("CA1", CollectorSink::new()));

        let mut callers = tokio::task::JoinSet::new();
        for i in 0..8 {
            let handle = handle.clone();
            callers.spawn(async move { handle.on_final_transcript(format!("utterance {i}")).await });
        }
        let mut turns = Vec::new();
        while let Some(joined) = callers.join_next().await {
            turns.push(joined.unwrap().unwrap());
        }
        turns.sort();
        assert_eq!(turns, (1..=8).collect::<Vec<_>>());

        tokio::time::timeout(Duration::from_secs(5), handle.wait_for_turn(8))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.status().turn, Some(8));

        let handle = Arc::try_unwrap(handle).ok().unwrap();
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_returns_to_idle() {
        let pipeline = pipeline(
            MockReplyGenerator::new().with_default_reply("a• b"),
            MockSynthesizer::new().with_default_delay(Duration::from_millis(10)),
        );
        let handle = pipeline.start("CA1", CollectorSink::new());
        assert_eq!(handle.phase(), TurnPhase::Idle);

        let turn = handle.on_final_transcript("hi").await.unwrap();
        handle.wait_for_turn(turn).await.unwrap();

        assert_eq!(
            handle.status(),
            TurnStatus {
                turn: Some(1),
                phase: TurnPhase::Idle
            }
        );
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_rejects_further_commands() {
        let pipeline = pipeline(MockReplyGenerator::new(), MockSynthesizer::new());
        let handle = pipeline.start("CA1", CollectorSink::new());
        assert!(handle.is_running());

        handle.cancel.cancel();
        handle.closed().await;
        assert!(!handle.is_running());
        assert!(handle.wait_for_turn(1).await.is_err());

        handle.stop().await.unwrap();
    }
}
