//! Synthesizer bridge engine — text in, a steady stream of PCM frames out.
//!
//! A speak request walks idle → request-sent → receiving → draining →
//! complete. The worker ships the request JSON and pulls audio frames into
//! the channel buffer with a self-reposting poll loop; the media thread
//! drains the buffer one fixed-size frame per tick, padding underruns with
//! silence so the host always gets a full frame on time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use voicebridge_ws::{Opcode, WsClient, json};

use crate::buffer::AudioBuffer;
use crate::config::SynthesizerConfig;
use crate::error::BridgeError;
use crate::host::{CodecDescriptor, SpeakRequest, SynthCause, SynthesizerEvent};
use crate::task::{WorkSender, Worker};

/// Tokens in a service status message that signal end of synthesis.
const COMPLETION_TOKENS: [&str; 3] = ["complete", "end", "done"];

// ── Work items ─────────────────────────────────────────────────────

enum SynthRequest {
    Speak(SpeakRequest),
    Stop,
    Pause,
    Resume,
}

enum SynthWork {
    Open(Arc<SynthShared>),
    Close(Arc<SynthShared>),
    Request(Arc<SynthShared>, SynthRequest),
    /// Connect, serialize and send the request JSON, start polling.
    SpeakStart(Arc<SynthShared>),
    /// One receive tick; self-reposts until a stop condition.
    RecvPoll(Arc<SynthShared>),
}

// ── Channel state ──────────────────────────────────────────────────

struct SynthState {
    request: Option<SpeakRequest>,
    stop_pending: bool,
    paused: bool,
    /// Worker-side poll loop is live.
    receiving: bool,
    /// The service has no more audio for this request.
    audio_complete: bool,
    idle_polls: u32,
    started_at: Option<Instant>,
    codec: Option<CodecDescriptor>,
}

struct SynthShared {
    config: SynthesizerConfig,
    ws: WsClient,
    buffer: AudioBuffer,
    state: Mutex<SynthState>,
    events: UnboundedSender<SynthesizerEvent>,
    work: WorkSender<SynthWork>,
}

impl SynthShared {
    fn state(&self) -> MutexGuard<'_, SynthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SynthesizerEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("synthesizer event receiver dropped");
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Owns the background worker shared by all synthesizer channels.
pub struct SynthesizerEngine {
    worker: Worker<SynthWork>,
}

impl SynthesizerEngine {
    pub fn new() -> Result<Self, BridgeError> {
        Ok(Self {
            worker: Worker::spawn("voicebridge-synth", handle_work)?,
        })
    }

    /// Create a channel and the event stream the host consumes.
    #[must_use]
    pub fn channel(
        &self,
        config: SynthesizerConfig,
    ) -> (SynthesizerChannel, UnboundedReceiver<SynthesizerEvent>) {
        let (events, event_rx) = unbounded_channel();
        let shared = Arc::new(SynthShared {
            ws: WsClient::new(config.ws.clone()),
            buffer: AudioBuffer::new(config.buffer_size),
            state: Mutex::new(SynthState {
                request: None,
                stop_pending: false,
                paused: false,
                receiving: false,
                audio_complete: false,
                idle_polls: 0,
                started_at: None,
                codec: None,
            }),
            events,
            work: self.worker.sender(),
            config,
        });
        (SynthesizerChannel { shared }, event_rx)
    }
}

// ── Channel ────────────────────────────────────────────────────────

/// One synthesis session endpoint, bound to a host media channel.
pub struct SynthesizerChannel {
    shared: Arc<SynthShared>,
}

impl SynthesizerChannel {
    /// Bind the negotiated media codec. Speak requests are rejected until
    /// this has happened.
    pub fn bind_codec(&self, codec: CodecDescriptor) {
        self.shared.state().codec = Some(codec);
    }

    /// Connection state of the underlying WS client (diagnostics).
    #[must_use]
    pub fn ws_state(&self) -> voicebridge_ws::WsState {
        self.shared.ws.state()
    }

    // ── Request dispatch context (must not block) ──────────────────

    pub fn open(&self) -> Result<(), BridgeError> {
        self.post(SynthWork::Open(Arc::clone(&self.shared)))
    }

    pub fn close(&self) -> Result<(), BridgeError> {
        self.post(SynthWork::Close(Arc::clone(&self.shared)))
    }

    pub fn speak(&self, request: SpeakRequest) -> Result<(), BridgeError> {
        self.request(SynthRequest::Speak(request))
    }

    /// Stop is cooperative: the response is deferred until the media
    /// thread's next tick flushes it.
    pub fn stop(&self) -> Result<(), BridgeError> {
        self.request(SynthRequest::Stop)
    }

    /// Barge-in tears the playback down the same way a stop does.
    pub fn barge_in(&self) -> Result<(), BridgeError> {
        self.request(SynthRequest::Stop)
    }

    pub fn pause(&self) -> Result<(), BridgeError> {
        self.request(SynthRequest::Pause)
    }

    pub fn resume(&self) -> Result<(), BridgeError> {
        self.request(SynthRequest::Resume)
    }

    fn request(&self, request: SynthRequest) -> Result<(), BridgeError> {
        self.post(SynthWork::Request(Arc::clone(&self.shared), request))
    }

    fn post(&self, work: SynthWork) -> Result<(), BridgeError> {
        self.shared.work.post(work)
    }

    // ── Media stream context (must not block) ──────────────────────

    /// Fill one fixed-size PCM frame for the host's media tick.
    ///
    /// Returns whether `out` now carries frame data (real audio, padded
    /// tail, or underrun silence). `false` means the channel has nothing
    /// playing this tick.
    pub fn read_frame(&self, out: &mut [u8]) -> bool {
        let shared = &self.shared;
        let mut st = shared.state();

        // A pending stop beats everything else on this tick.
        if st.stop_pending {
            st.stop_pending = false;
            st.request = None;
            st.paused = false;
            st.receiving = false;
            st.audio_complete = false;
            st.idle_polls = 0;
            drop(st);
            shared.buffer.reset();
            shared.emit(SynthesizerEvent::Stopped);
            return false;
        }

        if st.request.is_none() || st.paused {
            return false;
        }

        let available = shared.buffer.available();

        if available >= out.len() {
            shared.buffer.read_into(out);
            true
        } else if st.audio_complete && available == 0 {
            // Fully drained.
            drop(st);
            complete_speak(shared, SynthCause::Normal);
            false
        } else if st.audio_complete {
            // Last partial frame: real tail plus silence padding.
            let (n, _) = shared.buffer.read_into(&mut out[..available]);
            out[n..].fill(0);
            true
        } else {
            // Underrun while the service is still producing.
            out.fill(0);
            true
        }
    }
}

// ── Worker handlers ────────────────────────────────────────────────

fn handle_work(work: SynthWork) {
    match work {
        SynthWork::Open(shared) => {
            tracing::info!("synthesizer channel open");
            shared.emit(SynthesizerEvent::ChannelOpened);
        }
        SynthWork::Close(shared) => {
            shared.ws.disconnect(true);
            tracing::info!("synthesizer channel closed");
            shared.emit(SynthesizerEvent::ChannelClosed);
        }
        SynthWork::Request(shared, request) => handle_request(&shared, request),
        SynthWork::SpeakStart(shared) => handle_speak_start(&shared),
        SynthWork::RecvPoll(shared) => handle_recv_poll(&shared),
    }
}

fn handle_request(shared: &Arc<SynthShared>, request: SynthRequest) {
    match request {
        SynthRequest::Speak(request) => handle_speak(shared, request),
        SynthRequest::Stop => {
            tracing::info!("stop requested");
            let mut st = shared.state();
            st.stop_pending = true;
            st.receiving = false;
        }
        SynthRequest::Pause => {
            shared.state().paused = true;
            shared.emit(SynthesizerEvent::Paused);
        }
        SynthRequest::Resume => {
            shared.state().paused = false;
            shared.emit(SynthesizerEvent::Resumed);
        }
    }
}

fn handle_speak(shared: &Arc<SynthShared>, request: SpeakRequest) {
    {
        let mut st = shared.state();
        if st.codec.is_none() {
            drop(st);
            tracing::warn!("speak rejected: no codec descriptor");
            shared.emit(SynthesizerEvent::SpeakFailed);
            return;
        }
        if st.request.is_some() {
            drop(st);
            tracing::warn!("speak rejected: request already active");
            shared.emit(SynthesizerEvent::SpeakFailed);
            return;
        }
        shared.buffer.reset();
        st.audio_complete = false;
        st.paused = false;
        st.receiving = true;
        st.idle_polls = 0;
        st.started_at = Some(Instant::now());
        st.request = Some(request);
    }
    tracing::info!("speak in progress");
    shared.emit(SynthesizerEvent::SpeakStarted);
    let _ = shared.work.post(SynthWork::SpeakStart(Arc::clone(shared)));
}

fn handle_speak_start(shared: &Arc<SynthShared>) {
    let (request, sample_rate) = {
        let st = shared.state();
        let Some(request) = st.request.clone() else {
            return;
        };
        (request, st.codec.map_or(8000, |c| c.sample_rate))
    };

    if request.text.trim().is_empty() {
        // Nothing to synthesize; fail without touching the network.
        tracing::warn!("empty text in speak request");
        complete_speak(shared, SynthCause::Error);
        return;
    }

    if let Err(e) = shared.ws.ensure_connected() {
        tracing::error!(error = %e, "failed to reach the synthesis service");
        complete_speak(shared, SynthCause::Error);
        return;
    }

    let body = request_json(&request, sample_rate);
    tracing::debug!(bytes = body.len(), "sending tts request");
    if let Err(e) = shared.ws.send_text(&body) {
        tracing::error!(error = %e, "failed to send tts request");
        complete_speak(shared, SynthCause::Error);
        return;
    }

    let _ = shared.work.post(SynthWork::RecvPoll(Arc::clone(shared)));
}

/// One receive tick: binary audio goes into the buffer, a status message
/// or close ends the stream, idleness is counted against the budget.
fn handle_recv_poll(shared: &Arc<SynthShared>) {
    {
        let st = shared.state();
        if st.stop_pending || !st.receiving {
            return;
        }
        if st
            .started_at
            .is_some_and(|t| t.elapsed() > shared.config.max_duration)
        {
            drop(st);
            tracing::warn!("speak budget exceeded");
            if shared.buffer.write_pos() > 0 {
                finish_receiving(shared);
            } else {
                complete_speak(shared, SynthCause::Error);
            }
            return;
        }
    }

    match shared.ws.receive_frame() {
        Ok(Some(received)) => match received.opcode {
            Opcode::Binary | Opcode::Continuation => {
                shared.buffer.write(&received.payload);
                shared.state().idle_polls = 0;
            }
            Opcode::Text => {
                let message = String::from_utf8_lossy(&received.payload);
                tracing::debug!(message = %message, "service status message");
                if COMPLETION_TOKENS.iter().any(|t| message.contains(t)) {
                    tracing::info!("synthesis complete");
                    finish_receiving(shared);
                    return;
                }
            }
            Opcode::Close => {
                finish_receiving(shared);
                return;
            }
            _ => {}
        },
        Ok(None) => {
            let idle = {
                let mut st = shared.state();
                st.idle_polls += 1;
                st.idle_polls
            };
            if idle > shared.config.max_idle_polls {
                if shared.buffer.write_pos() > 0 {
                    tracing::warn!("idle budget exhausted, treating stream as finished");
                    finish_receiving(shared);
                } else {
                    tracing::error!("no audio within the idle budget");
                    complete_speak(shared, SynthCause::Error);
                }
                return;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "transport failure while receiving audio");
            complete_speak(shared, SynthCause::Error);
            return;
        }
    }

    let _ = shared.work.post(SynthWork::RecvPoll(Arc::clone(shared)));
}

/// The service is done producing; the media thread drains what is left
/// and emits the completion.
fn finish_receiving(shared: &Arc<SynthShared>) {
    {
        let mut st = shared.state();
        st.audio_complete = true;
        st.receiving = false;
    }
    shared.buffer.close_producer();
}

/// Emit the single SPEAK-COMPLETE for the active request. A second call
/// for the same request is a no-op.
fn complete_speak(shared: &Arc<SynthShared>, cause: SynthCause) {
    {
        let mut st = shared.state();
        if st.request.take().is_none() {
            return;
        }
        st.receiving = false;
    }
    tracing::info!(cause = ?cause, "speak complete");
    shared.emit(SynthesizerEvent::SpeakComplete { cause });
}

/// Flat request object the synthesis service expects. Hand-assembled so
/// the escaping matches the wire contract byte for byte.
fn request_json(request: &SpeakRequest, sample_rate: u32) -> String {
    format!(
        "{{\"action\":\"tts\",\"text\":\"{}\",\"voice\":\"{}\",\"speed\":{:.2},\"pitch\":{:.2},\
         \"volume\":{:.2},\"sample_rate\":{sample_rate},\"format\":\"pcm\",\"session_id\":\"{}\"}}",
        json::escape(&request.text),
        json::escape(&request.voice),
        request.speed,
        request.pitch,
        request.volume,
        json::escape(&request.session_id),
    )
}
