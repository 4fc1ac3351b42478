//! Bridge engines adapting a media-control speech host to WS-reachable
//! speech services.
//!
//! Two engines share one pattern: the host's request dispatch and media
//! callbacks never block — they flip flags, touch a per-channel byte
//! buffer, and post work items; a single background worker per engine owns
//! every socket operation and keeps itself scheduled by reposting its own
//! poll steps.
//!
//! - [`recognizer`] — microphone audio in, text results out
//! - [`synthesizer`] — text in, PCM audio out
//! - [`buffer`] — the bounded byte buffer between worker and media thread
//! - [`vad`] — voice-activity seam plus a reference energy detector
//! - [`host`] — the types crossing the host boundary
//! - [`config`] — parameter-map resolution and contractual defaults

pub mod buffer;
pub mod config;
pub mod error;
pub mod host;
pub mod recognizer;
pub mod synthesizer;
pub mod task;
pub mod vad;

// Re-export key types for convenience
pub use buffer::AudioBuffer;
pub use config::{ParamMap, RecognizerConfig, SynthesizerConfig};
pub use error::BridgeError;
pub use host::{
    CodecDescriptor, MediaFrame, MediaFrameKind, RecogCause, RecognitionResult, RecognizeRequest,
    RecognizerEvent, SpeakRequest, SynthCause, SynthesizerEvent,
};
pub use recognizer::{RecognizerChannel, RecognizerEngine};
pub use synthesizer::{SynthesizerChannel, SynthesizerEngine};
pub use vad::{ActivityDetector, EnergyDetector, VadEvent};
