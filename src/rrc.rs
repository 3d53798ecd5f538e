//! Root raised-cosine pulse shaping. The modem uses a single fixed design
//! (alpha = 0.5, 20 samples per symbol, 8-symbol span, 161 taps) computed
//! once at startup and normalized to unit energy.

pub const RRC_ALPHA: f64 = 0.5;
pub const RRC_SPAN_SYMBOLS: u32 = 8;
pub const RRC_TAPS: usize = 161;

pub fn rrc_taps(alpha: f64, sps: u32, span_symbols: u32) -> anyhow::Result<Vec<f32>> {
    if !(0.0 < alpha && alpha <= 1.0) {
        anyhow::bail!("alpha must be in (0,1]");
    }
    if span_symbols == 0 || span_symbols % 2 != 0 {
        anyhow::bail!("span_symbols must be a positive even integer");
    }
    if sps == 0 {
        anyhow::bail!("sps must be positive");
    }

    let n_taps = (span_symbols * sps + 1) as usize;
    let center = (n_taps as f64 - 1.0) / 2.0;
    let sps_f = sps as f64;

    let mut h = vec![0f64; n_taps];
    for (i, h_i) in h.iter_mut().enumerate() {
        let ti = (i as f64 - center) / sps_f;
        if ti.abs() < 1e-12 {
            *h_i = 1.0 - alpha + 4.0 * alpha / std::f64::consts::PI;
            continue;
        }
        let sing = (1.0 / (4.0 * alpha)).abs();
        if (ti.abs() - sing).abs() < 1e-9 {
            let a = alpha;
            *h_i = (a / 2.0_f64.sqrt())
                * ((1.0 + 2.0 / std::f64::consts::PI) * (std::f64::consts::PI / (4.0 * a)).sin()
                    + (1.0 - 2.0 / std::f64::consts::PI)
                        * (std::f64::consts::PI / (4.0 * a)).cos());
            continue;
        }

        let a = alpha;
        let num = (std::f64::consts::PI * ti * (1.0 - a)).sin()
            + 4.0 * a * ti * (std::f64::consts::PI * ti * (1.0 + a)).cos();
        let den = std::f64::consts::PI * ti * (1.0 - (4.0 * a * ti).powi(2));
        *h_i = num / den;
    }

    let e: f64 = h.iter().map(|v| v * v).sum();
    let scale = e.sqrt();
    for v in &mut h {
        *v /= scale;
    }

    Ok(h.into_iter().map(|v| v as f32).collect())
}

/// The fixed receive/transmit pulse shape.
pub fn modem_taps() -> Vec<f32> {
    // The parameter checks cannot fail for the fixed design.
    rrc_taps(
        RRC_ALPHA,
        crate::frame::SAMPLES_PER_SYMBOL as u32,
        RRC_SPAN_SYMBOLS,
    )
    .unwrap_or_default()
}

/// Streaming FIR with persistent delay line, one sample at a time.
#[derive(Clone, Debug)]
pub struct FirState {
    taps: Vec<f32>,
    z: Vec<f32>,
    pos: usize,
}

impl FirState {
    pub fn new(taps: Vec<f32>) -> Self {
        let n = taps.len();
        Self {
            taps,
            z: vec![0.0; n],
            pos: 0,
        }
    }

    /// Half the span, in samples.
    pub fn delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    pub fn reset(&mut self) {
        self.z.iter_mut().for_each(|v| *v = 0.0);
        self.pos = 0;
    }

    pub fn push(&mut self, x: f32) -> f32 {
        let n = self.taps.len();
        self.z[self.pos] = x;
        let mut acc = 0.0f32;
        for (k, &t) in self.taps.iter().enumerate() {
            let idx = (self.pos + n - k) % n;
            acc += t * self.z[idx];
        }
        self.pos = (self.pos + 1) % n;
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_design_has_161_unit_energy_taps() {
        let taps = modem_taps();
        assert_eq!(taps.len(), RRC_TAPS);
        let e: f32 = taps.iter().map(|v| v * v).sum();
        assert!((e - 1.0).abs() < 1e-4, "energy {e}");
        // Symmetric around the center tap.
        for i in 0..taps.len() / 2 {
            assert!((taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn cascade_is_nyquist_at_symbol_instants() {
        // RRC followed by RRC is a raised cosine: zero inter-symbol
        // interference at multiples of the symbol period.
        let taps = modem_taps();
        let mut f1 = FirState::new(taps.clone());
        let mut f2 = FirState::new(taps);
        let mut out = Vec::new();
        for n in 0..400 {
            let x = if n == 0 { 1.0 } else { 0.0 };
            out.push(f2.push(f1.push(x)));
        }
        let center = 160; // two group delays
        assert!((out[center] - 1.0).abs() < 1e-3);
        for k in 1..4 {
            assert!(out[center + 20 * k].abs() < 1e-3, "isi at +{k}");
            assert!(out[center - 20 * k].abs() < 1e-3, "isi at -{k}");
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(rrc_taps(0.0, 20, 8).is_err());
        assert!(rrc_taps(0.5, 0, 8).is_err());
        assert!(rrc_taps(0.5, 20, 7).is_err());
    }
}
