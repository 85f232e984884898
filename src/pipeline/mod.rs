//! Ordered reply pipeline of a phone call.
//!
//! Generated reply text is split into segments, the segments are synthesized
//! concurrently, and the sequencer writes the resulting audio to the caller
//! in the original order. Stations are tokio tasks connected by bounded
//! channels.

pub mod dispatcher;
pub mod frame;
pub mod orchestrator;
pub mod segmenter;
pub mod sequencer;
pub mod session;
pub mod sink;

pub use dispatcher::{DispatchSummary, SynthesisDispatcher};
pub use frame::{Segment, SequencerEvent, SynthesizedAudio, TurnId, TurnPhase, TurnStatus};
pub use orchestrator::{CallHandle, CallPipeline, CallPipelineConfig};
pub use segmenter::Segmenter;
pub use sequencer::{Flush, ReorderBuffer, SequencerConfig, SequencerStation};
pub use session::{CallSession, TurnCommand};
pub use sink::{CollectorSink, Emission, MediaStreamSink, OutboundSink, new_mark_label};
