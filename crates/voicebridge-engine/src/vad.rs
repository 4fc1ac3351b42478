//! Voice activity detection seam.
//!
//! The host normally supplies its own detector; [`ActivityDetector`] is the
//! trait it plugs into. The crate ships [`EnergyDetector`], a plain RMS
//! thresholding implementation, so the recognizer is usable and testable
//! without one.

use std::time::Duration;

use crate::host::MediaFrame;

/// Events a detector reports to the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech started.
    Activity,

    /// Speech ended — enough trailing silence accumulated.
    Inactivity,

    /// No speech at all within the no-input budget.
    NoInput,
}

/// Per-utterance speech boundary detector fed 20 ms PCM frames.
pub trait ActivityDetector: Send {
    /// Process one media frame; at most one event per call.
    fn process(&mut self, frame: &MediaFrame) -> Option<VadEvent>;

    /// Budget for [`VadEvent::NoInput`].
    fn set_no_input_timeout(&mut self, timeout: Duration);

    /// Trailing silence needed for [`VadEvent::Inactivity`].
    fn set_silence_timeout(&mut self, timeout: Duration);

    /// Sampling rate of the frames about to arrive.
    fn bind_sample_rate(&mut self, _sample_rate: u32) {}

    /// Back to the pre-utterance state.
    fn reset(&mut self);
}

// ── Energy-based reference implementation ──────────────────────────

/// Detector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for speech to start.
    Listening,
    /// Speech in progress, watching for trailing silence.
    Speaking,
}

/// RMS energy thresholding over s16le PCM.
///
/// Speech must persist for a short qualification window before
/// [`VadEvent::Activity`] fires, which filters clicks and pops; after
/// that, `silence_timeout` of continuous quiet produces
/// [`VadEvent::Inactivity`].
pub struct EnergyDetector {
    phase: Phase,
    sample_rate: u32,

    /// Normalized RMS above which a frame counts as speech.
    threshold: f32,

    /// Speech needed before Activity fires.
    min_speech: Duration,

    /// Silence needed after speech before Inactivity fires.
    silence_timeout: Duration,

    /// Budget for NoInput while still listening.
    no_input_timeout: Duration,

    speech_run: Duration,
    silence_run: Duration,
    listening_elapsed: Duration,
}

impl EnergyDetector {
    /// Frames below this normalized RMS are silence by default.
    pub const DEFAULT_THRESHOLD: f32 = 0.02;

    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            phase: Phase::Listening,
            sample_rate,
            threshold: Self::DEFAULT_THRESHOLD,
            min_speech: Duration::from_millis(120),
            silence_timeout: Duration::from_millis(300),
            no_input_timeout: Duration::from_secs(5),
            speech_run: Duration::ZERO,
            silence_run: Duration::ZERO,
            listening_elapsed: Duration::ZERO,
        }
    }

    /// Override the default speech/silence RMS threshold.
    pub const fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    fn frame_duration(&self, frame: &MediaFrame) -> Duration {
        let samples = frame.data.len() as u64 / 2;
        Duration::from_micros(samples.saturating_mul(1_000_000) / u64::from(self.sample_rate))
    }
}

impl ActivityDetector for EnergyDetector {
    fn process(&mut self, frame: &MediaFrame) -> Option<VadEvent> {
        let duration = self.frame_duration(frame);
        let speechy = rms_energy(&frame.data) > self.threshold;

        match self.phase {
            Phase::Listening => {
                self.listening_elapsed += duration;
                if speechy {
                    self.speech_run += duration;
                    if self.speech_run >= self.min_speech {
                        self.phase = Phase::Speaking;
                        self.silence_run = Duration::ZERO;
                        tracing::debug!("speech started");
                        return Some(VadEvent::Activity);
                    }
                } else {
                    self.speech_run = Duration::ZERO;
                    if self.listening_elapsed >= self.no_input_timeout {
                        self.listening_elapsed = Duration::ZERO;
                        tracing::debug!("no input within budget");
                        return Some(VadEvent::NoInput);
                    }
                }
            }

            Phase::Speaking => {
                if speechy {
                    self.silence_run = Duration::ZERO;
                } else {
                    self.silence_run += duration;
                    if self.silence_run >= self.silence_timeout {
                        self.reset();
                        tracing::debug!("speech ended");
                        return Some(VadEvent::Inactivity);
                    }
                }
            }
        }

        None
    }

    fn set_no_input_timeout(&mut self, timeout: Duration) {
        self.no_input_timeout = timeout;
    }

    fn set_silence_timeout(&mut self, timeout: Duration) {
        self.silence_timeout = timeout;
    }

    fn bind_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    fn reset(&mut self) {
        self.phase = Phase::Listening;
        self.speech_run = Duration::ZERO;
        self.silence_run = Duration::ZERO;
        self.listening_elapsed = Duration::ZERO;
    }
}

/// Normalized RMS of an s16le byte slice.
fn rms_energy(data: &[u8]) -> f32 {
    if data.len() < 2 {
        return 0.0;
    }
    let mut sum_squares = 0.0f64;
    let mut count = 0u32;
    for pair in data.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]])) / f64::from(i16::MAX);
        sum_squares += sample * sample;
        count += 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    let rms = (sum_squares / f64::from(count)).sqrt() as f32;
    rms
}
