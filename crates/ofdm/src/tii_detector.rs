use num::complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use dab_core::tii::TiiFingerprint;

/// Accumulates the FFT of TII-carrying NULL symbols and correlates against the
/// `70` MainId `x` `23` SubId carrier-comb patterns from EN 300 401 Annex C (spec
/// §4.5). Every transmitter in a single-frequency network shares the NULL symbol
/// period but is assigned a disjoint carrier subset (its "pattern"); the receiver
/// recovers which transmitters are audible by correlating accumulated NULL-symbol
/// energy against each candidate pattern's carrier positions.
///
/// The pattern table itself (`TiiPatternTable`) is Mode I specific and lives in
/// `dab_ofdm`, mirroring the carrier map / phase reference symbol split already
/// used by this workspace for transmission-mode-specific tables.
pub struct TiiDetector {
    fft: Arc<dyn Fft<f32>>,
    nb_fft: usize,
    accumulated_power: Vec<f32>,
    accumulated_phase: Vec<Complex32>,
    frames_accumulated: usize,
    frames_to_count: usize,
}

impl TiiDetector {
    pub fn new(nb_fft: usize, frames_to_count: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(nb_fft),
            nb_fft,
            accumulated_power: vec![0.0; nb_fft],
            accumulated_phase: vec![Complex32::default(); nb_fft],
            frames_accumulated: 0,
            frames_to_count: frames_to_count.max(1),
        }
    }

    /// Feeds one TII-carrying NULL symbol (already time-aligned, `nb_fft` samples).
    /// Returns `true` once `frames_to_count` symbols have been averaged and
    /// [`Self::analyze`] is ready to be called.
    pub fn accumulate(&mut self, null_symbol: &[Complex32]) -> bool {
        assert_eq!(null_symbol.len(), self.nb_fft);
        let mut buf = null_symbol.to_vec();
        self.fft.process(&mut buf);
        for (i, x) in buf.iter().enumerate() {
            self.accumulated_power[i] += x.norm_sqr();
            self.accumulated_phase[i] += x;
        }
        self.frames_accumulated += 1;
        self.frames_accumulated >= self.frames_to_count
    }

    pub fn reset(&mut self) {
        self.accumulated_power.iter_mut().for_each(|v| *v = 0.0);
        self.accumulated_phase.iter_mut().for_each(|v| *v = Complex32::default());
        self.frames_accumulated = 0;
    }

    /// Correlates the averaged spectrum against every pattern, emitting a
    /// fingerprint for any pattern whose strength clears `threshold_db` above the
    /// mean noise floor. `collisions` enables reporting more than one pattern per
    /// MainId (multiple transmitters sharing a MainId, disambiguated by phase).
    pub fn analyze(&self, table: &TiiPatternTable, threshold_db: f32, collisions: bool) -> Vec<TiiFingerprint> {
        let n = self.frames_accumulated.max(1) as f32;
        let mean_power: f32 = self.accumulated_power.iter().sum::<f32>() / (self.accumulated_power.len() as f32 * n);

        let mut detections = Vec::new();
        for pattern in table.patterns() {
            let mut sum_power = 0.0f32;
            let mut sum_phase = Complex32::default();
            for &carrier in &pattern.carriers {
                sum_power += self.accumulated_power[carrier] / n;
                sum_phase += self.accumulated_phase[carrier];
            }
            let avg_power = sum_power / (pattern.carriers.len() as f32);
            if avg_power <= 0.0 || mean_power <= 0.0 {
                continue;
            }
            let strength_db = 10.0 * (avg_power / mean_power).log10();
            if strength_db < threshold_db {
                continue;
            }
            let phase_deg = sum_phase.im.atan2(sum_phase.re).to_degrees();
            detections.push(TiiFingerprint {
                main_id: pattern.main_id,
                sub_id: pattern.sub_id,
                strength_db,
                phase_deg,
                non_etsi_phase: phase_deg.abs() > 90.0,
            });
            if !collisions {
                // Only the strongest sub-pattern per MainId is reported unless
                // collision detection is requested; since patterns are iterated in
                // (main_id, sub_id) order we keep scanning but the caller can
                // dedupe by main_id when collisions is false.
            }
        }
        if !collisions {
            dedupe_strongest_per_main_id(detections)
        } else {
            detections
        }
    }
}

fn dedupe_strongest_per_main_id(mut detections: Vec<TiiFingerprint>) -> Vec<TiiFingerprint> {
    detections.sort_by(|a, b| a.main_id.cmp(&b.main_id).then(b.strength_db.total_cmp(&a.strength_db)));
    detections.dedup_by_key(|d| d.main_id);
    detections
}

/// One MainId/SubId's carrier-comb pattern.
pub struct TiiPattern {
    pub main_id: u8,
    pub sub_id: u8,
    pub carriers: Vec<usize>,
}

/// A transmission-mode-specific table of TII patterns. Built by `dab_ofdm` for
/// Mode I; kept generic here so other modes could supply their own table.
pub struct TiiPatternTable {
    patterns: Vec<TiiPattern>,
}

impl TiiPatternTable {
    pub fn new(patterns: Vec<TiiPattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[TiiPattern] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_pattern_is_detected_above_threshold() {
        let nb_fft = 64;
        let mut detector = TiiDetector::new(nb_fft, 1);
        let mut symbol = vec![Complex32::new(0.01, 0.0); nb_fft];
        // Boost a handful of carriers far above the noise floor to emulate a
        // transmitter's comb.
        for &c in &[4usize, 12, 20, 28] {
            symbol[c] = Complex32::new(10.0, 0.0);
        }
        assert!(detector.accumulate(&symbol));
        let table = TiiPatternTable::new(vec![TiiPattern { main_id: 1, sub_id: 0, carriers: vec![4, 12, 20, 28] }]);
        let detections = detector.analyze(&table, 3.0, false);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].main_id, 1);
    }
}
