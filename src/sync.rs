//! Syncword synchronizer: turns the stream of dense correlations into a
//! peak event with the best sampling phase.
//!
//! The template is prepared once per syncword: the +/-3 symbol pattern is
//! upsampled, passed twice through the modem RRC (matching the transmit
//! and receive filters the live signal sees) and stripped of its DC mean.

use crate::frame::{SAMPLES_PER_SYMBOL, SYNCWORD_SYMBOLS};
use crate::ring::{CorrelatorRing, RING_SAMPLES, TEMPLATE_SAMPLES};
use crate::rrc::{modem_taps, FirState, RRC_TAPS};

/// Scale applied to template symbols before shaping, so the stored i16
/// template has usable dynamic range against x500-scaled input samples.
const TEMPLATE_SYMBOL_SCALE: f32 = 5000.0;

#[derive(Clone, Debug)]
pub struct Synchronizer {
    template: [i16; TEMPLATE_SAMPLES],
    history: [i32; RING_SAMPLES],
    triggered: bool,
    last_corr: i32,
    sampling_index: usize,
}

impl Synchronizer {
    pub fn new(symbols: [i8; SYNCWORD_SYMBOLS]) -> Self {
        Self {
            template: Self::build_template(&symbols),
            history: [0; RING_SAMPLES],
            triggered: false,
            last_corr: 0,
            sampling_index: 0,
        }
    }

    fn build_template(symbols: &[i8; SYNCWORD_SYMBOLS]) -> [i16; TEMPLATE_SAMPLES] {
        let taps = modem_taps();
        let mut shape1 = FirState::new(taps.clone());
        let mut shape2 = FirState::new(taps);

        let mut upsampled = vec![0.0f32; SYNCWORD_SYMBOLS * SAMPLES_PER_SYMBOL];
        for (i, &sym) in symbols.iter().enumerate() {
            upsampled[i * SAMPLES_PER_SYMBOL] = sym as f32 * TEMPLATE_SYMBOL_SCALE;
        }

        let mut out = [0i16; TEMPLATE_SAMPLES];
        let mut produced = 0usize;
        let mut mean_acc = 0i64;
        let mut fed = 0usize;
        while produced < TEMPLATE_SAMPLES {
            let x = upsampled.get(fed).copied().unwrap_or(0.0);
            fed += 1;
            let y = shape2.push(shape1.push(x));
            // Discard one filter length of output so the stored window
            // starts past the cascade group delay.
            if fed <= RRC_TAPS {
                continue;
            }
            let v = y.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            out[produced] = v;
            mean_acc += v as i64;
            produced += 1;
        }

        let mean = (mean_acc / TEMPLATE_SAMPLES as i64) as i16;
        for v in &mut out {
            *v -= mean;
        }
        out
    }

    pub fn template(&self) -> &[i16; TEMPLATE_SAMPLES] {
        &self.template
    }

    pub fn last_corr(&self) -> i32 {
        self.last_corr
    }

    /// Best sampling phase (absolute sample index modulo the symbol
    /// period) of the most recent resolved peak. Only meaningful in the
    /// call where `update` returned non-zero.
    pub fn sampling_index(&self) -> usize {
        self.sampling_index
    }

    /// One step: correlate, track the trigger envelope, and on a falling
    /// edge resolve the recorded peak. Returns +1 for a positive peak,
    /// -1 for a negative one, 0 otherwise.
    pub fn update(&mut self, ring: &CorrelatorRing, pos_th: i32, neg_th: i32) -> i8 {
        let corr = ring.conv_dense(&self.template);
        let trigger = (corr > pos_th && corr >= self.last_corr)
            || (corr < neg_th && corr <= self.last_corr);
        self.last_corr = corr;

        if trigger {
            if !self.triggered {
                self.history.fill(0);
                self.triggered = true;
            }
            self.history[ring.index()] = corr;
            return 0;
        }

        if !self.triggered {
            return 0;
        }
        self.triggered = false;

        let mut peak = corr;
        let mut best_slot = ring.index();
        for (slot, &v) in self.history.iter().enumerate() {
            if v.unsigned_abs() > peak.unsigned_abs() {
                peak = v;
                best_slot = slot;
            }
        }

        let age = (ring.index() + RING_SAMPLES - best_slot) % RING_SAMPLES;
        let abs_idx = ring.total().wrapping_sub(1).wrapping_sub(age as u64);
        self.sampling_index = (abs_idx % SAMPLES_PER_SYMBOL as u64) as usize;

        if peak >= 0 {
            1
        } else {
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SyncTag;

    #[test]
    fn template_is_shaped_and_dc_free() {
        let sync = Synchronizer::new(SyncTag::Lsf.symbols());
        let t = sync.template();
        let mean: i64 = t.iter().map(|&v| v as i64).sum::<i64>() / t.len() as i64;
        assert!(mean.abs() <= 1, "residual mean {mean}");
        let max = t.iter().map(|&v| (v as i32).abs()).max().unwrap();
        assert!(max > 10_000, "template amplitude {max}");
    }

    #[test]
    fn silent_ring_never_triggers() {
        let mut sync = Synchronizer::new(SyncTag::Lsf.symbols());
        let mut ring = CorrelatorRing::new();
        for _ in 0..1000 {
            ring.push(0);
            assert_eq!(sync.update(&ring, 1000, -1000), 0);
        }
    }

    #[test]
    fn resolves_peak_of_its_own_waveform() {
        let mut sync = Synchronizer::new(SyncTag::Lsf.symbols());
        let waveform: Vec<i16> = sync.template().iter().map(|&v| v / 8).collect();

        let mut ring = CorrelatorRing::new();
        let mut fired = Vec::new();
        for (n, &v) in waveform.iter().enumerate() {
            ring.push(v);
            let r = sync.update(&ring, 10_000, -10_000);
            if r != 0 {
                fired.push((n, r, sync.sampling_index()));
            }
        }
        for n in 0..2 * SAMPLES_PER_SYMBOL {
            ring.push(0);
            let r = sync.update(&ring, 10_000, -10_000);
            if r != 0 {
                fired.push((waveform.len() + n, r, sync.sampling_index()));
            }
        }

        // The self-correlation peak sits at full alignment: absolute
        // sample 140, phase 0.
        assert!(
            fired.iter().any(|&(_, r, phase)| r == 1 && phase == 0),
            "events: {fired:?}"
        );
    }
}
