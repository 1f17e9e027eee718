//! RMS-based voice activity detection with pre-roll.
//!
//! The gate watches the 16 kHz frames coming off the conference SDK and
//! decides what the avatar hears: silence is buffered in a small ring so
//! the attack of the first voiced syllable survives, speech streams
//! through, and a ~500 ms silence tail keeps trailing phonemes intact
//! before `voice_end` closes the utterance.

use super::resample::{samples_to_pcm_bytes, upsample_16k_to_24k};

/// Gate tuning. The threshold is expressed in mean-square units of 16-bit
/// samples and was tuned for translator-produced speech, where SNR is
/// high; noisy environments need a different value.
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub rms_threshold: i64,
    pub pre_roll_frames: usize,
    pub silence_tail_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 100,
            pre_roll_frames: 10,
            silence_tail_frames: 50,
        }
    }
}

/// Mean-square energy of a frame: `(1/N) Σ x²`. Zero for an empty frame.
pub fn mean_square(samples: &[i16]) -> i64 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i64 = samples.iter().map(|&s| s as i64 * s as i64).sum();
    sum / samples.len() as i64
}

/// What to do with one input frame.
#[derive(Debug)]
pub struct GateResult {
    /// Upsampled frames to transmit, oldest first. At voice onset this is
    /// the pre-roll ring followed by the triggering frame.
    pub send: Vec<Vec<u8>>,
    /// Emit `voice_end` after the sends (exactly once per utterance).
    pub voice_end: bool,
    /// The current frame at 24 kHz regardless of voice state, for the
    /// optional debug sink.
    pub upsampled: Vec<u8>,
}

impl GateResult {
    /// True when any audio was transmitted (drives the idle timestamp).
    pub fn transmitted(&self) -> bool {
        !self.send.is_empty()
    }
}

pub struct VoiceGate {
    config: VadConfig,
    ring: Vec<Option<Vec<u8>>>,
    ring_pos: usize,
    sending: bool,
    silence_frames: u32,
    frames_sent: u64,
}

impl VoiceGate {
    pub fn new(config: VadConfig) -> Self {
        let ring = vec![None; config.pre_roll_frames.max(1)];
        Self {
            config,
            ring,
            ring_pos: 0,
            sending: false,
            silence_frames: 0,
            frames_sent: 0,
        }
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Frames transmitted in the current utterance. Resets at `voice_end`;
    /// not a monotonic counter.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Feeds one 10 ms 16 kHz frame through the gate.
    pub fn push(&mut self, samples_16k: &[i16]) -> GateResult {
        let energy = mean_square(samples_16k);
        let upsampled = samples_to_pcm_bytes(&upsample_16k_to_24k(samples_16k));
        let voiced = energy > self.config.rms_threshold;

        let mut send = Vec::new();
        let mut voice_end = false;

        if voiced {
            if !self.sending {
                // Onset: flush the pre-roll ring oldest-first. take() empties
                // the slots so a later onset can never replay this utterance.
                for i in 0..self.ring.len() {
                    let idx = (self.ring_pos + i) % self.ring.len();
                    if let Some(frame) = self.ring[idx].take() {
                        send.push(frame);
                    }
                }
                self.sending = true;
            }
            self.silence_frames = 0;
            send.push(upsampled.clone());
        } else if self.sending {
            self.silence_frames += 1;
            if self.silence_frames < self.config.silence_tail_frames {
                // Tail: keep the stream open so word endings are not clipped.
                send.push(upsampled.clone());
            } else {
                voice_end = true;
                self.sending = false;
                self.silence_frames = 0;
                self.frames_sent = 0;
            }
        }

        self.frames_sent += send.len() as u64;

        // The ring position advances on every frame regardless of state.
        self.ring[self.ring_pos] = Some(upsampled.clone());
        self.ring_pos = (self.ring_pos + 1) % self.ring.len();

        GateResult {
            send,
            voice_end,
            upsampled,
        }
    }
}
