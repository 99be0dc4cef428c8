//! Optional acoustic echo cancellation (spec §4.2)
//!
//! When enabled, the coordinator feeds every segment it plays back into
//! [`EchoCanceller::push_reference`] (resampled to the ingest rate); the
//! endpointer runs each incoming mic frame through [`EchoCanceller::cancel`]
//! before gating and before the sample lands in the pre-roll ring buffer,
//! so a barge-in final is built from the AEC-processed signal rather than
//! the raw one (spec requires pre-roll to come from the processed buffer
//! to avoid timing artifacts). This is a fixed-gain subtraction canceller,
//! not an adaptive (NLMS) one — good enough to suppress a synthesized
//! voice bleeding back into the mic path, not a general-purpose AEC.

use std::collections::VecDeque;

const SUBTRACTION_GAIN: f32 = 0.6;

pub struct EchoCanceller {
    reference: VecDeque<f32>,
    max_reference_samples: usize,
}

impl EchoCanceller {
    pub fn new(max_reference_ms: u64, sample_rate_hz: u32) -> Self {
        let max_reference_samples = (max_reference_ms * sample_rate_hz as u64 / 1000) as usize;
        Self { reference: VecDeque::new(), max_reference_samples }
    }

    /// Queue newly played reference audio, already resampled to the
    /// ingest rate. If the backlog exceeds the configured horizon, the
    /// oldest excess is dropped silently — this is the source's
    /// undocumented behavior when the playback reference runs longer
    /// than the mic buffer can consume it (spec §9 open question);
    /// preserved here, but logged at `debug!` as a diagnostic rather than
    /// silently disappearing.
    pub fn push_reference(&mut self, samples: &[f32]) {
        self.reference.extend(samples.iter().copied());
        if self.reference.len() > self.max_reference_samples {
            let excess = self.reference.len() - self.max_reference_samples;
            tracing::debug!(excess, "AEC reference backlog exceeded horizon, truncating oldest samples");
            for _ in 0..excess {
                self.reference.pop_front();
            }
        }
    }

    /// Subtract time-aligned reference from one mic frame, consuming
    /// exactly `mic.len()` samples off the reference queue. Positions
    /// with no queued reference (nothing played yet, or the reference
    /// ran dry) pass the mic sample through unchanged.
    pub fn cancel(&mut self, mic: &[f32]) -> Vec<f32> {
        mic.iter()
            .map(|&m| match self.reference.pop_front() {
                Some(r) => (m - r * SUBTRACTION_GAIN).clamp(-1.0, 1.0),
                None => m,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reduces_amplitude_of_matching_reference() {
        let mut aec = EchoCanceller::new(1000, 1000);
        aec.push_reference(&[0.5, 0.5, 0.5]);
        let out = aec.cancel(&[0.5, 0.5, 0.5]);
        for s in out {
            assert!(s.abs() < 0.5, "expected attenuation, got {s}");
        }
    }

    #[test]
    fn excess_reference_is_truncated_to_the_configured_horizon() {
        let mut aec = EchoCanceller::new(10, 1000); // 10-sample horizon
        aec.push_reference(&vec![0.1; 50]);
        let out = aec.cancel(&vec![0.0; 5]);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn cancel_passes_through_once_reference_is_exhausted() {
        let mut aec = EchoCanceller::new(1000, 1000);
        let out = aec.cancel(&[0.3, 0.3]);
        assert_eq!(out, vec![0.3, 0.3]);
    }
}
