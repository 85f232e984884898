//! Telephony media stream transport.

pub mod protocol;
#[cfg(feature = "server")]
pub mod server;

pub use protocol::{InboundEvent, MarkPayload, MediaPayload, OutboundMessage, StartMetadata};
#[cfg(feature = "server")]
pub use server::{AppState, MediaStreamCall, incoming_call_twiml, router, serve};
