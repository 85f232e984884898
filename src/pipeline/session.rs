//! Per-call turn driver.
//!
//! Owns the conversation and the turn lifecycle of one call. Every finalized
//! transcript starts a new turn: the previous turn (if still running) is
//! cancelled, the sequencer is told to start a fresh ordering domain, and a
//! turn task runs generation, segmentation and synthesis dispatch.

use crate::backend::{Conversation, ReplyGenerator, SpeechSynthesizer};
use crate::error::{CallrelayError, Result};
use crate::pipeline::dispatcher::SynthesisDispatcher;
use crate::pipeline::frame::{SequencerEvent, TurnId, TurnPhase, TurnStatus};
use crate::pipeline::segmenter::Segmenter;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Requests from the call handle to the turn driver.
#[derive(Debug)]
pub enum TurnCommand {
    /// A finalized transcript. Starts the next turn and reports its id on `started`.
    Transcript {
        text: String,
        started: oneshot::Sender<TurnId>,
    },
    /// Text to synthesize and play outside of any turn.
    Announce(String),
}

/// Everything a turn task needs, shared across the turns of a call.
#[derive(Clone)]
struct TurnContext {
    call_id: Arc<str>,
    generator: Arc<dyn ReplyGenerator>,
    dispatcher: Arc<SynthesisDispatcher>,
    segmenter: Segmenter,
    conversation: Arc<Mutex<Conversation>>,
    events: mpsc::Sender<SequencerEvent>,
    status: Arc<watch::Sender<TurnStatus>>,
}

/// Turn driver of one call.
pub struct CallSession {
    context: TurnContext,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    synthesis_timeout: Duration,
    cancel: CancellationToken,
    next_turn: TurnId,
    current_turn: Option<CancellationToken>,
    tasks: JoinSet<()>,
}

impl CallSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call_id: &str,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        dispatcher: Arc<SynthesisDispatcher>,
        segmenter: Segmenter,
        conversation: Conversation,
        events: mpsc::Sender<SequencerEvent>,
        status: Arc<watch::Sender<TurnStatus>>,
        synthesis_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context: TurnContext {
                call_id: Arc::from(call_id),
                generator,
                dispatcher,
                segmenter,
                conversation: Arc::new(Mutex::new(conversation)),
                events,
                status,
            },
            synthesizer,
            synthesis_timeout,
            cancel,
            next_turn: 1,
            current_turn: None,
            tasks: JoinSet::new(),
        }
    }

    /// Shared handle to the call's conversation.
    pub fn conversation(&self) -> Arc<Mutex<Conversation>> {
        self.context.conversation.clone()
    }

    /// Runs the turn driver until the command channel closes or the call is cancelled.
    pub async fn run(mut self, mut commands: mpsc::Receiver<TurnCommand>) {
        loop {
            while self.tasks.try_join_next().is_some() {}

            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                TurnCommand::Transcript { text, started } => {
                    let turn = self.next_turn;
                    self.next_turn += 1;
                    if self.start_turn(turn, text).await.is_err() {
                        break;
                    }
                    if started.send(turn).is_err() {
                        debug!(call = %self.context.call_id, turn, "turn requester went away");
                    }
                }
                TurnCommand::Announce(text) => self.announce(text),
            }
        }

        if let Some(turn) = self.current_turn.take() {
            turn.cancel();
        }
        self.tasks.shutdown().await;
        debug!(call = %self.context.call_id, "turn driver stopped");
    }

    async fn start_turn(&mut self, turn: TurnId, transcript: String) -> Result<()> {
        if let Some(previous) = self.current_turn.take() {
            previous.cancel();
        }

        info!(call = %self.context.call_id, turn, transcript = %transcript, "turn started");

        self.context.status.send_replace(TurnStatus {
            turn: Some(turn),
            phase: TurnPhase::Generating,
        });
        self.context
            .events
            .send(SequencerEvent::TurnStarted(turn))
            .await
            .map_err(|_| CallrelayError::Transport {
                message: "sequencer stopped".to_string(),
            })?;

        let turn_cancel = self.cancel.child_token();
        self.current_turn = Some(turn_cancel.clone());
        self.tasks
            .spawn(run_turn(self.context.clone(), turn, transcript, turn_cancel));
        Ok(())
    }

    fn announce(&mut self, text: String) {
        let synthesizer = self.synthesizer.clone();
        let events = self.context.events.clone();
        let call_id = self.context.call_id.clone();
        let timeout = self.synthesis_timeout;
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(timeout, synthesizer.synthesize(&text)) => result,
            };

            match result {
                Ok(Ok(payload)) => {
                    if events.send(SequencerEvent::OutOfBand(payload)).await.is_err() {
                        debug!(call = %call_id, "sequencer gone before announcement");
                    }
                }
                Ok(Err(e)) => warn!(call = %call_id, text = %text, error = %e, "announcement synthesis failed"),
                Err(_) => warn!(
                    call = %call_id,
                    text = %text,
                    timeout_ms = timeout.as_millis() as u64,
                    "announcement synthesis timed out"
                ),
            }
        });
    }
}

async fn run_turn(ctx: TurnContext, turn: TurnId, transcript: String, cancel: CancellationToken) {
    let history = lock(&ctx.conversation).clone();

    let generated = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        reply = ctx.generator.generate(&transcript, &history) => reply,
    };

    // History only records turns that are still current.
    if cancel.is_cancelled() {
        return;
    }

    let reply = match generated {
        Ok(reply) => {
            let mut conversation = lock(&ctx.conversation);
            conversation.push_user(transcript.as_str());
            conversation.push_assistant(reply.as_str());
            reply
        }
        Err(e) => {
            warn!(
                call = %ctx.call_id,
                turn,
                generator = ctx.generator.name(),
                error = %e,
                "reply generation failed"
            );
            String::new()
        }
    };

    set_phase(&ctx.status, turn, TurnPhase::Segmenting);
    let segments = ctx.segmenter.segment(turn, &reply);
    debug!(call = %ctx.call_id, turn, segments = segments.len(), "reply segmented");

    set_phase(&ctx.status, turn, TurnPhase::Synthesizing);
    ctx.dispatcher
        .dispatch_turn(turn, segments, &ctx.events, &cancel)
        .await;
}

/// Updates the phase of `turn` unless a newer turn took over.
fn set_phase(status: &watch::Sender<TurnStatus>, turn: TurnId, phase: TurnPhase) {
    status.send_if_modified(|current| {
        if current.turn == Some(turn) && current.phase != phase {
            current.phase = phase;
            true
        } else {
            false
        }
    });
}

fn lock(conversation: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    match conversation.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
