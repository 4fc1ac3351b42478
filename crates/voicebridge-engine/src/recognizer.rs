//! Recognizer bridge engine — microphone audio in, text results out.
//!
//! Per utterance the channel walks idle → listening → streaming →
//! awaiting-result → complete. The media thread feeds frames through the
//! VAD and into the channel buffer; everything that touches the socket
//! runs on the engine's background worker, which polls for the service's
//! text reply by reposting a work item to itself.
//!
//! ```text
//!   media thread ──VAD──▶ buffer ──SendAudio──▶ worker ──▶ WS binary
//!                                                  │
//!                       RECOGNITION-COMPLETE ◀──RecvResult (self-repost)
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use voicebridge_ws::{Opcode, WsClient};

use crate::buffer::AudioBuffer;
use crate::config::RecognizerConfig;
use crate::error::BridgeError;
use crate::host::{
    CodecDescriptor, MediaFrame, MediaFrameKind, NLSML_MEDIA_TYPE, RecogCause, RecognitionResult,
    RecognizeRequest, RecognizerEvent,
};
use crate::task::{WorkSender, Worker};
use crate::vad::{ActivityDetector, VadEvent};

// ── Work items ─────────────────────────────────────────────────────

/// Host requests routed through the worker.
enum RecogRequest {
    Recognize(RecognizeRequest),
    Stop,
    StartInputTimers,
    DefineGrammar,
}

/// Work processed by the engine's background worker. Every item carries
/// the channel it belongs to, so one worker serves any number of channels.
enum RecogWork {
    Open(Arc<RecogShared>),
    Close(Arc<RecogShared>),
    Request(Arc<RecogShared>, RecogRequest),
    /// Ship the buffered utterance (or the streamed tail) and start
    /// polling for the result.
    SendAudio(Arc<RecogShared>),
    /// Forward one real-time chunk.
    StreamAudio(Arc<RecogShared>, Vec<u8>),
    /// One poll step of the result wait loop; self-reposts.
    RecvResult(Arc<RecogShared>),
}

// ── Channel state ──────────────────────────────────────────────────

struct RecogState {
    request: Option<RecognizeRequest>,
    stop_pending: bool,
    timers_started: bool,
    speech_started: bool,
    waiting_result: bool,
    /// Next unstreamed byte in the channel buffer (streaming mode).
    stream_pos: usize,
    started_at: Option<Instant>,
    detector: Box<dyn ActivityDetector>,
    codec: Option<CodecDescriptor>,
}

struct RecogShared {
    config: RecognizerConfig,
    ws: WsClient,
    buffer: AudioBuffer,
    state: Mutex<RecogState>,
    events: UnboundedSender<RecognizerEvent>,
    work: WorkSender<RecogWork>,
}

impl RecogShared {
    fn state(&self) -> MutexGuard<'_, RecogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Best-effort event delivery; a dropped receiver is the host's choice.
    fn emit(&self, event: RecognizerEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("recognizer event receiver dropped");
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Owns the background worker shared by all recognizer channels.
pub struct RecognizerEngine {
    worker: Worker<RecogWork>,
}

impl RecognizerEngine {
    pub fn new() -> Result<Self, BridgeError> {
        Ok(Self {
            worker: Worker::spawn("voicebridge-recog", handle_work)?,
        })
    }

    /// Create a channel and the event stream the host consumes.
    #[must_use]
    pub fn channel(
        &self,
        config: RecognizerConfig,
        detector: Box<dyn ActivityDetector>,
    ) -> (RecognizerChannel, UnboundedReceiver<RecognizerEvent>) {
        let (events, event_rx) = unbounded_channel();
        let shared = Arc::new(RecogShared {
            ws: WsClient::new(config.ws.clone()),
            buffer: AudioBuffer::new(config.buffer_size),
            state: Mutex::new(RecogState {
                request: None,
                stop_pending: false,
                timers_started: false,
                speech_started: false,
                waiting_result: false,
                stream_pos: 0,
                started_at: None,
                detector,
                codec: None,
            }),
            events,
            work: self.worker.sender(),
            config,
        });
        (RecognizerChannel { shared }, event_rx)
    }
}

// ── Channel ────────────────────────────────────────────────────────

/// One recognition session endpoint, bound to a host media channel.
pub struct RecognizerChannel {
    shared: Arc<RecogShared>,
}

impl RecognizerChannel {
    /// Bind the negotiated media codec. Recognize requests are rejected
    /// until this has happened.
    pub fn bind_codec(&self, codec: CodecDescriptor) {
        let mut st = self.shared.state();
        st.detector.bind_sample_rate(codec.sample_rate);
        st.codec = Some(codec);
    }

    /// Connection state of the underlying WS client (diagnostics).
    #[must_use]
    pub fn ws_state(&self) -> voicebridge_ws::WsState {
        self.shared.ws.state()
    }

    // ── Request dispatch context (must not block) ──────────────────

    pub fn open(&self) -> Result<(), BridgeError> {
        self.post(RecogWork::Open(Arc::clone(&self.shared)))
    }

    pub fn close(&self) -> Result<(), BridgeError> {
        self.post(RecogWork::Close(Arc::clone(&self.shared)))
    }

    pub fn recognize(&self, request: RecognizeRequest) -> Result<(), BridgeError> {
        self.request(RecogRequest::Recognize(request))
    }

    /// Stop is cooperative: the response is deferred until the media
    /// thread's next tick flushes it.
    pub fn stop(&self) -> Result<(), BridgeError> {
        self.request(RecogRequest::Stop)
    }

    pub fn start_input_timers(&self) -> Result<(), BridgeError> {
        self.request(RecogRequest::StartInputTimers)
    }

    /// Grammars are the service's business; accepted without side effects.
    pub fn define_grammar(&self) -> Result<(), BridgeError> {
        self.request(RecogRequest::DefineGrammar)
    }

    fn request(&self, request: RecogRequest) -> Result<(), BridgeError> {
        self.post(RecogWork::Request(Arc::clone(&self.shared), request))
    }

    fn post(&self, work: RecogWork) -> Result<(), BridgeError> {
        self.shared.work.post(work)
    }

    // ── Media stream context (must not block) ──────────────────────

    /// Accept one 20 ms frame from the media thread.
    ///
    /// Touches only the channel's own mutexes (uncontended in steady
    /// state) and posts work items; all I/O happens on the worker.
    pub fn write_frame(&self, frame: &MediaFrame) {
        let shared = &self.shared;
        let mut st = shared.state();

        // A pending stop beats everything else on this tick.
        if st.stop_pending {
            st.stop_pending = false;
            st.request = None;
            st.waiting_result = false;
            st.speech_started = false;
            drop(st);
            shared.emit(RecognizerEvent::Stopped);
            return;
        }

        if st.request.is_none() {
            return;
        }

        let mut start_of_input = false;
        let mut completion: Option<RecogCause> = None;
        let mut send_utterance = false;

        match st.detector.process(frame) {
            Some(VadEvent::Activity) => {
                if !st.speech_started {
                    st.speech_started = true;
                    start_of_input = true;
                }
            }
            Some(VadEvent::Inactivity) => {
                // Utterance over: no further real-time chunks.
                st.speech_started = false;
                if shared.buffer.write_pos() > 0 {
                    send_utterance = true;
                } else {
                    completion = Some(RecogCause::Success);
                }
            }
            Some(VadEvent::NoInput) => {
                if st.timers_started {
                    completion = Some(RecogCause::NoInputTimeout);
                }
            }
            None => {}
        }

        if frame.kind == MediaFrameKind::Audio {
            shared.buffer.write(&frame.data);
        }

        // Real-time chunking once speech is underway.
        let mut chunk: Option<Vec<u8>> = None;
        if shared.config.streaming && st.speech_started {
            let unsent = shared.buffer.write_pos().saturating_sub(st.stream_pos);
            if unsent >= shared.config.stream_chunk_size {
                chunk = Some(
                    shared
                        .buffer
                        .copy_range(st.stream_pos, shared.config.stream_chunk_size),
                );
                st.stream_pos += shared.config.stream_chunk_size;
            }
        }
        drop(st);

        if start_of_input {
            tracing::info!("voice activity detected");
            shared.emit(RecognizerEvent::StartOfInput);
        }
        if let Some(data) = chunk {
            let _ = shared.work.post(RecogWork::StreamAudio(Arc::clone(shared), data));
        }
        if send_utterance {
            tracing::info!("voice inactivity detected");
            let _ = shared.work.post(RecogWork::SendAudio(Arc::clone(shared)));
        }
        if let Some(cause) = completion {
            complete(shared, cause, None);
        }
    }
}

// ── Worker handlers ────────────────────────────────────────────────

fn handle_work(work: RecogWork) {
    match work {
        RecogWork::Open(shared) => {
            tracing::info!("recognizer channel open");
            shared.emit(RecognizerEvent::ChannelOpened);
        }
        RecogWork::Close(shared) => {
            shared.ws.disconnect(true);
            tracing::info!("recognizer channel closed");
            shared.emit(RecognizerEvent::ChannelClosed);
        }
        RecogWork::Request(shared, request) => handle_request(&shared, request),
        RecogWork::SendAudio(shared) => handle_send_audio(&shared),
        RecogWork::StreamAudio(shared, chunk) => handle_stream_audio(&shared, &chunk),
        RecogWork::RecvResult(shared) => handle_recv_result(&shared),
    }
}

fn handle_request(shared: &Arc<RecogShared>, request: RecogRequest) {
    match request {
        RecogRequest::Recognize(request) => handle_recognize(shared, request),
        RecogRequest::Stop => {
            tracing::info!("stop requested");
            shared.state().stop_pending = true;
        }
        RecogRequest::StartInputTimers => {
            shared.state().timers_started = true;
            shared.emit(RecognizerEvent::TimersStarted);
        }
        RecogRequest::DefineGrammar => {
            shared.emit(RecognizerEvent::GrammarDefined);
        }
    }
}

fn handle_recognize(shared: &Arc<RecogShared>, request: RecognizeRequest) {
    {
        let mut st = shared.state();
        if st.codec.is_none() {
            drop(st);
            tracing::warn!("recognize rejected: no codec descriptor");
            shared.emit(RecognizerEvent::RecognizeFailed);
            return;
        }
        if st.request.is_some() {
            drop(st);
            tracing::warn!("recognize rejected: request already active");
            shared.emit(RecognizerEvent::RecognizeFailed);
            return;
        }
        st.timers_started = request.start_input_timers;
        if let Some(timeout) = request.no_input_timeout {
            st.detector.set_no_input_timeout(timeout);
        }
        if let Some(timeout) = request.speech_complete_timeout {
            st.detector.set_silence_timeout(timeout);
        }
        st.detector.reset();
    }

    if let Err(e) = shared.ws.ensure_connected() {
        tracing::error!(error = %e, "failed to reach the recognition service");
        shared.emit(RecognizerEvent::RecognizeFailed);
        return;
    }

    shared.buffer.reset();
    {
        let mut st = shared.state();
        st.stream_pos = 0;
        st.speech_started = false;
        st.waiting_result = false;
        st.started_at = Some(Instant::now());
        st.request = Some(request);
    }
    tracing::info!("recognize in progress");
    shared.emit(RecognizerEvent::RecognizeStarted);
}

/// End of utterance: ship what the service has not seen yet and switch to
/// result polling. In buffered mode that is the whole utterance as one
/// binary frame; in streaming mode the not-yet-streamed tail followed by
/// an empty binary frame as the end-of-utterance marker.
fn handle_send_audio(shared: &Arc<RecogShared>) {
    // The media thread stopped advancing the streaming cursor when it
    // posted this item, so stream_pos is stable here.
    let stream_pos = shared.state().stream_pos;
    let buffered = shared.buffer.write_pos();

    let sent = if shared.config.streaming {
        let tail = buffered.saturating_sub(stream_pos);
        let tail_ok =
            tail == 0 || shared.ws.send_binary(&shared.buffer.copy_range(stream_pos, tail)).is_ok();
        tail_ok && shared.ws.send_binary(&[]).is_ok()
    } else if buffered > 0 && shared.ws.is_connected() {
        tracing::info!(bytes = buffered, "sending utterance audio");
        shared.ws.send_binary(&shared.buffer.copy_range(0, buffered)).is_ok()
    } else {
        shared.buffer.reset();
        shared.state().stream_pos = 0;
        complete(shared, RecogCause::Success, None);
        return;
    };

    shared.buffer.reset();
    shared.state().stream_pos = 0;

    if sent {
        shared.state().waiting_result = true;
        let _ = shared.work.post(RecogWork::RecvResult(Arc::clone(shared)));
    } else {
        tracing::error!("failed to send utterance audio");
        complete(shared, RecogCause::Error, None);
    }
}

fn handle_stream_audio(shared: &Arc<RecogShared>, chunk: &[u8]) {
    if !shared.ws.is_connected() {
        return;
    }
    // Failures here surface through the result poll loop or a timeout.
    if let Err(e) = shared.ws.send_binary(chunk) {
        tracing::debug!(error = %e, "stream chunk send failed");
    }
}

/// One tick of the result wait: either the text reply arrived, the server
/// went away, the budget ran out, or we repost ourselves and try again.
fn handle_recv_result(shared: &Arc<RecogShared>) {
    {
        let st = shared.state();
        if !st.waiting_result || st.request.is_none() {
            return;
        }
        if st
            .started_at
            .is_some_and(|t| t.elapsed() > shared.config.max_duration)
        {
            drop(st);
            tracing::warn!("recognition budget exceeded");
            complete(shared, RecogCause::Error, None);
            return;
        }
    }

    match shared.ws.receive_frame() {
        Ok(Some(received)) => match received.opcode {
            Opcode::Text if !received.payload.is_empty() => {
                let body = String::from_utf8_lossy(&received.payload).into_owned();
                tracing::info!(bytes = body.len(), "recognition result received");
                complete(shared, RecogCause::Success, Some(body));
                return;
            }
            Opcode::Close => {
                complete(shared, RecogCause::Error, None);
                return;
            }
            _ => {}
        },
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "transport failure while awaiting result");
            complete(shared, RecogCause::Error, None);
            return;
        }
    }

    if shared.state().waiting_result {
        let _ = shared.work.post(RecogWork::RecvResult(Arc::clone(shared)));
    }
}

/// Emit the single RECOGNITION-COMPLETE for the active request. A second
/// call for the same request is a no-op.
fn complete(shared: &Arc<RecogShared>, cause: RecogCause, body: Option<String>) {
    {
        let mut st = shared.state();
        if st.request.take().is_none() {
            return;
        }
        st.waiting_result = false;
    }
    let result = body
        .filter(|b| !b.is_empty())
        .map(|body| RecognitionResult {
            media_type: NLSML_MEDIA_TYPE.to_string(),
            body,
        });
    tracing::info!(cause = ?cause, "recognition complete");
    shared.emit(RecognizerEvent::RecognitionComplete { cause, result });
}
