//! Channel occupancy detector: a short FFT over idle-time IQ blocks and a
//! band-energy ratio test that gates the transmitter.

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Busy when the in-band mean magnitude reaches this multiple of the
/// out-of-band mean.
const BUSY_RATIO: f32 = 5.0;

pub struct ChannelWatcher {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    buf: Vec<Complex32>,
    fft_size: usize,
    half_band_bins: usize,
    busy: bool,
}

impl ChannelWatcher {
    /// `signal_bandwidth_hz` is the expected occupied bandwidth of one
    /// transmission (9 kHz for 4-FSK at 4800 Bd).
    pub fn new(
        fft_size: usize,
        sample_rate_hz: u32,
        signal_bandwidth_hz: u32,
    ) -> anyhow::Result<Self> {
        if fft_size == 0 || !fft_size.is_power_of_two() {
            anyhow::bail!("fft_size must be a power of two");
        }
        let half_band_bins = (signal_bandwidth_hz as usize * fft_size) / sample_rate_hz as usize;
        if half_band_bins == 0 || 2 * half_band_bins >= fft_size {
            anyhow::bail!("signal bandwidth unrepresentable at this fft size");
        }
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();
        Ok(Self {
            fft,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            buf: vec![Complex32::new(0.0, 0.0); fft_size],
            fft_size,
            half_band_bins,
            busy: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Examine one block of `fft_size` IQ samples; returns the updated
    /// busy state.
    pub fn process(&mut self, iq: &[Complex32]) -> anyhow::Result<bool> {
        if iq.len() != self.fft_size {
            anyhow::bail!("expected {} samples, got {}", self.fft_size, iq.len());
        }
        self.buf.copy_from_slice(iq);
        self.fft
            .process_with_scratch(&mut self.buf, &mut self.scratch);

        // In-band: the first half_band_bins positive-frequency bins (DC
        // excluded) and their negative-frequency mirrors.
        let n = self.fft_size;
        let half = self.half_band_bins;
        let mut in_sum = 0.0f32;
        let mut in_cnt = 0usize;
        let mut out_sum = 0.0f32;
        let mut out_cnt = 0usize;
        for (k, v) in self.buf.iter().enumerate() {
            let mag = v.norm();
            let in_band = (k >= 1 && k < half) || k >= n - half;
            if in_band {
                in_sum += mag;
                in_cnt += 1;
            } else {
                out_sum += mag;
                out_cnt += 1;
            }
        }
        let in_mean = in_sum / in_cnt as f32;
        let out_mean = out_sum / out_cnt as f32;

        self.busy = in_mean >= BUSY_RATIO * out_mean;
        Ok(self.busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const FS: u32 = 96_000;
    const FFT: usize = 128;

    fn noise_block(rng: &mut StdRng, rms: f32) -> Vec<Complex32> {
        let n01 = Normal::<f32>::new(0.0, rms).unwrap();
        (0..FFT)
            .map(|_| Complex32::new(n01.sample(rng), n01.sample(rng)))
            .collect()
    }

    #[test]
    fn near_carrier_tone_reads_busy() -> anyhow::Result<()> {
        let mut watcher = ChannelWatcher::new(FFT, FS, 9_000)?;
        let mut rng = StdRng::seed_from_u64(7);
        let mut block = noise_block(&mut rng, 0.01);
        // 1.5 kHz tone: two FFT bins above DC, well inside the band.
        let f = 1_500.0f32;
        for (n, v) in block.iter_mut().enumerate() {
            let ph = 2.0 * std::f32::consts::PI * f * n as f32 / FS as f32;
            *v += Complex32::new(ph.cos(), ph.sin());
        }
        assert!(watcher.process(&block)?);
        assert!(watcher.is_busy());
        Ok(())
    }

    #[test]
    fn noise_alone_reads_clear() -> anyhow::Result<()> {
        let mut watcher = ChannelWatcher::new(FFT, FS, 9_000)?;
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..10 {
            let block = noise_block(&mut rng, 0.01);
            assert!(!watcher.process(&block)?);
        }
        assert!(!watcher.is_busy());
        Ok(())
    }

    #[test]
    fn wrong_block_size_is_rejected() -> anyhow::Result<()> {
        let mut watcher = ChannelWatcher::new(FFT, FS, 9_000)?;
        assert!(watcher.process(&[Complex32::new(0.0, 0.0); 64]).is_err());
        Ok(())
    }

    #[test]
    fn half_band_spans_twelve_bins() -> anyhow::Result<()> {
        // 9 kHz at 96 kHz over 128 bins spans 12 bins per side.
        let watcher = ChannelWatcher::new(FFT, FS, 9_000)?;
        assert_eq!(watcher.half_band_bins, 12);
        Ok(())
    }
}
