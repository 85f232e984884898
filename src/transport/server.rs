//! HTTP and WebSocket front end for the telephony provider.
//!
//! - `GET|POST /incoming-call` answers with TwiML that greets the caller and
//!   connects the call audio to the media stream WebSocket.
//! - `GET /media-stream` upgrades to the media stream WebSocket. Each
//!   connection is one call with its own pipeline.
//! - `GET /health` answers `ok`.
//!
//! Each media stream runs two loops: ingest parses provider events and feeds
//! caller audio to the transcript source, egress writes the pipeline's
//! outbound frames to the socket.

use crate::backend::{TranscriptSource, TranscriptSourceFactory};
use crate::config::Config;
use crate::defaults;
use crate::pipeline::{CallHandle, CallPipeline, MediaStreamSink};
use crate::transport::protocol::{InboundEvent, OutboundMessage};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared state of the server.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<CallPipeline>,
    transcripts: TranscriptSourceFactory,
    greeting: Arc<str>,
    announcement: Option<Arc<str>>,
    public_host: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<CallPipeline>,
        transcripts: TranscriptSourceFactory,
        config: &Config,
    ) -> Self {
        Self {
            pipeline,
            transcripts,
            greeting: Arc::from(config.call.greeting.as_str()),
            announcement: config.call.announcement.as_deref().map(Arc::from),
            public_host: config.server.public_host.as_deref().map(Arc::from),
        }
    }
}

/// Builds the router with all routes and state applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/incoming-call", get(incoming_call).post(incoming_call))
        .route(defaults::MEDIA_STREAM_PATH, get(media_stream))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health() -> &'static str {
    "ok"
}

async fn incoming_call(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let host = state
        .public_host
        .as_deref()
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "localhost".to_string());

    debug!(host = %host, "answering incoming call");
    (
        [(header::CONTENT_TYPE, "text/xml")],
        incoming_call_twiml(&state.greeting, &host),
    )
}

/// TwiML connecting the call to this server's media stream.
pub fn incoming_call_twiml(greeting: &str, host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Response>\n  \
         <Say>{}</Say>\n  \
         <Connect>\n    \
         <Stream url=\"wss://{}{}\" />\n  \
         </Connect>\n\
         </Response>",
        xml_escape(greeting),
        xml_escape(host),
        defaults::MEDIA_STREAM_PATH,
    )
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

enum Ingest {
    Frame(Option<Result<Message, axum::Error>>),
    Ended,
}

async fn handle_media_stream(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let buffer = state.pipeline.config().channel_buffer_size.max(1);
    let (frames_tx, mut frames_rx) = mpsc::channel::<OutboundMessage>(buffer);

    info!("media stream opened");

    let mut egress = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(frame) = frames_rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut call = MediaStreamCall::new(state, frames_tx);

    loop {
        let next = tokio::select! {
            frame = ws_receiver.next() => Ingest::Frame(frame),
            _ = &mut egress => Ingest::Ended,
            _ = call_closed(call.handle.as_ref()) => Ingest::Ended,
        };

        let text = match next {
            Ingest::Frame(Some(Ok(Message::Text(text)))) => text,
            Ingest::Frame(Some(Ok(Message::Close(_)))) | Ingest::Frame(None) => break,
            Ingest::Frame(Some(Err(e))) => {
                warn!(error = %e, "media stream receive failed");
                break;
            }
            Ingest::Frame(Some(Ok(_))) => continue,
            Ingest::Ended => break,
        };

        let event = match InboundEvent::parse(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring malformed frame");
                continue;
            }
        };

        if call.on_event(event).await.is_break() {
            break;
        }
    }

    call.finish().await;
    egress.abort();
    info!("media stream closed");
}

/// Resolves when the call pipeline ended on its own (transport failure).
async fn call_closed(handle: Option<&CallHandle>) {
    match handle {
        Some(handle) => handle.closed().await,
        None => std::future::pending().await,
    }
}

/// One media stream connection and the call pipeline behind it.
pub struct MediaStreamCall {
    state: AppState,
    frames: mpsc::Sender<OutboundMessage>,
    transcripts: Box<dyn TranscriptSource>,
    handle: Option<CallHandle>,
}

impl MediaStreamCall {
    pub fn new(state: AppState, frames: mpsc::Sender<OutboundMessage>) -> Self {
        let transcripts = (state.transcripts)();
        Self {
            state,
            frames,
            transcripts,
            handle: None,
        }
    }

    /// The running call pipeline, once the stream has started.
    pub fn handle(&self) -> Option<&CallHandle> {
        self.handle.as_ref()
    }

    /// Applies one provider event. Breaks when the stream is over.
    pub async fn on_event(&mut self, event: InboundEvent) -> ControlFlow<()> {
        match event {
            InboundEvent::Connected { protocol } => {
                debug!(protocol = ?protocol, "media stream connected");
            }
            InboundEvent::Start { start } => {
                if self.handle.is_some() {
                    warn!(stream = %start.stream_sid, "ignoring repeated start event");
                    return ControlFlow::Continue(());
                }

                let call_id = start
                    .call_sid
                    .clone()
                    .unwrap_or_else(|| start.stream_sid.clone());
                info!(call = %call_id, stream = %start.stream_sid, "media stream started");

                let sink = MediaStreamSink::new(start.stream_sid, self.frames.clone());
                let handle = self.state.pipeline.start(call_id, sink);

                if let Some(announcement) = &self.state.announcement
                    && let Err(e) = handle.announce(announcement.to_string()).await
                {
                    warn!(error = %e, "failed to queue announcement");
                }
                self.handle = Some(handle);
            }
            InboundEvent::Media { media } => {
                let Some(handle) = &self.handle else {
                    debug!("media before start, ignoring");
                    return ControlFlow::Continue(());
                };

                let audio = match media.decode() {
                    Ok(audio) => audio,
                    Err(e) => {
                        warn!(error = %e, "ignoring undecodable media");
                        return ControlFlow::Continue(());
                    }
                };

                let transcripts = match self.transcripts.push_audio(&audio) {
                    Ok(transcripts) => transcripts,
                    Err(e) => {
                        warn!(
                            source = self.transcripts.name(),
                            error = %e,
                            "transcription failed"
                        );
                        return ControlFlow::Continue(());
                    }
                };

                for transcript in transcripts {
                    if let Err(e) = handle.on_final_transcript(transcript).await {
                        warn!(error = %e, "call pipeline is gone");
                        return ControlFlow::Break(());
                    }
                }
            }
            InboundEvent::Mark { mark } => {
                debug!(mark = %mark.name, "playback reached mark");
            }
            InboundEvent::Stop => {
                info!("media stream stop received");
                return ControlFlow::Break(());
            }
            InboundEvent::Unknown => {
                debug!("ignoring unsupported event");
            }
        }
        ControlFlow::Continue(())
    }

    /// Stops the call pipeline, if it was started.
    pub async fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            let call_id = handle.call_id().to_string();
            if let Err(e) = handle.stop().await {
                warn!(call = %call_id, error = %e, "call ended with error");
            }
        }
    }
}
