//! Types crossing the host ↔ bridge seam.
//!
//! The media-control host owns request dispatch, media stream callbacks and
//! event delivery; the bridge only defines the shapes that cross over. A
//! channel hands back a `tokio` unbounded receiver at creation — every
//! response and event the engine produces arrives there, so emitting from
//! the media callback can never block.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Media type attached to recognition result bodies.
pub const NLSML_MEDIA_TYPE: &str = "application/x-nlsml";

// ── Media stream ───────────────────────────────────────────────────

/// Negotiated codec parameters for a channel's media stream.
///
/// The bridge speaks raw linear PCM only (signed 16-bit little-endian);
/// transcoding is the host's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecDescriptor {
    /// Sampling rate in Hz (8000 or 16000).
    pub sample_rate: u32,

    /// Bytes per media frame at the host's callback cadence.
    pub frame_size: usize,
}

impl CodecDescriptor {
    /// LPCM descriptor with the standard 20 ms frame duration.
    #[must_use]
    pub const fn lpcm(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            // 20 ms of 16-bit mono samples
            frame_size: (sample_rate as usize / 50) * 2,
        }
    }
}

/// What a media frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFrameKind {
    /// Real audio payload — gets buffered/streamed.
    Audio,
    /// Timing-only frame (comfort noise, gaps); still feeds the VAD clock.
    Silence,
}

/// One frame delivered by the host's media thread.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: MediaFrameKind,
    /// PCM bytes (s16le). Present for both kinds so the VAD can keep time.
    pub data: Vec<u8>,
}

impl MediaFrame {
    #[must_use]
    pub const fn audio(data: Vec<u8>) -> Self {
        Self {
            kind: MediaFrameKind::Audio,
            data,
        }
    }

    /// A zeroed timing frame of `len` bytes.
    #[must_use]
    pub fn silence(len: usize) -> Self {
        Self {
            kind: MediaFrameKind::Silence,
            data: vec![0; len],
        }
    }
}

// ── Requests ───────────────────────────────────────────────────────

/// Parameters of a recognize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeRequest {
    /// Whether the no-input timer runs from the start of the request.
    pub start_input_timers: bool,

    /// Overrides the detector's no-input timeout.
    pub no_input_timeout: Option<Duration>,

    /// Overrides the detector's speech-complete (silence) timeout.
    pub speech_complete_timeout: Option<Duration>,
}

impl Default for RecognizeRequest {
    fn default() -> Self {
        Self {
            start_input_timers: true,
            no_input_timeout: None,
            speech_complete_timeout: None,
        }
    }
}

/// Parameters of a speak request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    /// Text to synthesize.
    pub text: String,

    /// Voice identifier understood by the remote service.
    pub voice: String,

    /// Prosody rate multiplier.
    pub speed: f32,

    /// Prosody pitch multiplier.
    pub pitch: f32,

    /// Prosody volume multiplier.
    pub volume: f32,

    /// Session identifier forwarded to the service.
    pub session_id: String,
}

impl SpeakRequest {
    /// A request with default voice and prosody.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

impl Default for SpeakRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            voice: "default".to_string(),
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            session_id: String::new(),
        }
    }
}

// ── Completion causes ──────────────────────────────────────────────

/// Why a recognize request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecogCause {
    Success,
    NoInputTimeout,
    Error,
}

/// Why a speak request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthCause {
    Normal,
    Error,
}

/// Recognition result body handed back to the host verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Always [`NLSML_MEDIA_TYPE`] for the services this bridge targets.
    pub media_type: String,
    pub body: String,
}

// ── Events ─────────────────────────────────────────────────────────

/// Everything a recognizer channel reports back to the host: request
/// responses (started / failed / deferred stop) and the two utterance
/// events.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    ChannelOpened,
    ChannelClosed,

    /// In-progress response to a recognize request.
    RecognizeStarted,

    /// Method-failed response to a recognize request.
    RecognizeFailed,

    /// Response to a start-input-timers request.
    TimersStarted,

    /// Response to a define-grammar request.
    GrammarDefined,

    /// Deferred response to a stop request, flushed from the media thread.
    Stopped,

    /// Speech detected — emitted once per utterance.
    StartOfInput,

    /// Exactly one per recognize request.
    RecognitionComplete {
        cause: RecogCause,
        result: Option<RecognitionResult>,
    },
}

/// Synthesizer counterpart of [`RecognizerEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesizerEvent {
    ChannelOpened,
    ChannelClosed,

    /// In-progress response to a speak request.
    SpeakStarted,

    /// Method-failed response to a speak request.
    SpeakFailed,

    Paused,
    Resumed,

    /// Deferred response to a stop (or barge-in) request.
    Stopped,

    /// Exactly one per speak request.
    SpeakComplete {
        cause: SynthCause,
    },
}
