//! 4-FSK demodulator: DC removal and RRC matched filtering, a
//! correlation-driven lock state machine, and the soft-bit quantizer that
//! turns symbol samples into confidence values.

use crate::frame::{
    classify_syncword, SoftFrame, SyncTag, FRAME_SYMBOLS, SAMPLES_PER_SYMBOL, SAMPLE_RATE,
    SOFT_BITS_PER_FRAME, SYNCWORD_SYMBOLS,
};
use crate::iir::{DcBlocker, EnvelopeFilter};
use crate::ring::{CorrelatorRing, SYNC_WINDOW};
use crate::rrc::{modem_taps, FirState};
use crate::sync::Synchronizer;

/// Incoming FM-demodulated samples are moved into integer range before
/// correlation and quantization.
pub const INPUT_SCALE: f32 = 500.0;

/// 50 ms of warm-up so the RRC and DC stages settle.
const INIT_SAMPLES: u32 = (SAMPLE_RATE / 20) as u32;

/// Quiet time (~26 ms) required on the channel before the receiver arms.
const QUIET_SAMPLES: u32 = 2500;

/// Soft-Hamming acceptance bound for the first syncword of a transmission.
const SYNCED_MAX_DISTANCE: f32 = 1.0;

/// Looser bound for in-stream re-synchronization.
const RESYNC_MAX_DISTANCE: f32 = 1.7;

/// Consecutive missed syncwords before the lock is declared lost.
const MAX_MISSED_SYNCS: u8 = 4;

/// Correlation-threshold policy. The tracked form follows the rectified
/// sample envelope and suits variable-gain front ends; the fixed form
/// reproduces the constant used by hardware with a known signal level.
#[derive(Clone, Copy, Debug)]
pub enum CorrThreshold {
    Tracked { scale: f32 },
    Fixed(i32),
}

impl Default for CorrThreshold {
    fn default() -> Self {
        CorrThreshold::Tracked { scale: 32.0 }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DemodState {
    Init,
    Unlocked,
    Armed,
    Synced,
    Locked,
    SyncUpdate,
}

/// What the demodulator hands upstream.
#[derive(Debug)]
pub enum DemodEvent {
    /// A complete 384-slot soft-bit frame, tagged by the syncword its own
    /// first sixteen slots quantize to.
    Frame { tag: SyncTag, soft: Box<SoftFrame> },
    /// A validated end-of-transmission marker.
    EndOfTransmission,
}

#[derive(Clone, Copy, Debug)]
struct PendingSync {
    tag: SyncTag,
    sampling_index: usize,
    deadline: u64,
}

pub struct Demodulator {
    state: DemodState,
    dc: DcBlocker,
    rrc: FirState,
    envelope: EnvelopeFilter,
    threshold: CorrThreshold,
    envelope_level: f32,

    ring: CorrelatorRing,
    lsf_sync: Synchronizer,
    pkt_sync: Synchronizer,
    eot_sync: Synchronizer,

    init_count: u32,
    quiet_count: u32,
    sync_count: u32,
    missed_syncs: u8,

    sampling_point: usize,
    deviation: (i32, i32),
    candidate: SyncTag,
    pending: Option<PendingSync>,

    frame: Box<SoftFrame>,
    frame_symbols: usize,
    locked: bool,
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Demodulator {
    pub fn new() -> Self {
        Self::with_threshold(CorrThreshold::default())
    }

    pub fn with_threshold(threshold: CorrThreshold) -> Self {
        Self {
            state: DemodState::Init,
            dc: DcBlocker::new(),
            rrc: FirState::new(modem_taps()),
            envelope: EnvelopeFilter::new(),
            threshold,
            envelope_level: 0.0,
            ring: CorrelatorRing::new(),
            lsf_sync: Synchronizer::new(SyncTag::Lsf.symbols()),
            pkt_sync: Synchronizer::new(SyncTag::Pkt.symbols()),
            eot_sync: Synchronizer::new(SyncTag::Eot.symbols()),
            init_count: INIT_SAMPLES,
            quiet_count: QUIET_SAMPLES,
            sync_count: 0,
            missed_syncs: 0,
            sampling_point: 0,
            deviation: (0, 0),
            candidate: SyncTag::Lsf,
            pending: None,
            frame: Box::new([0; SOFT_BITS_PER_FRAME]),
            frame_symbols: 0,
            locked: false,
        }
    }

    pub fn reset(&mut self) {
        let threshold = self.threshold;
        *self = Self::with_threshold(threshold);
    }

    pub fn state(&self) -> DemodState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Feed a block of FM-demodulated baseband samples; any frames or
    /// markers completed while consuming it are returned in order.
    pub fn update(&mut self, samples: &[f32]) -> Vec<DemodEvent> {
        let mut events = Vec::new();
        for &raw in samples {
            self.process_sample(raw, &mut events);
        }
        events
    }

    fn positive_threshold(&self) -> i32 {
        match self.threshold {
            CorrThreshold::Tracked { scale } => (self.envelope_level * scale) as i32,
            CorrThreshold::Fixed(th) => th,
        }
    }

    fn process_sample(&mut self, raw: f32, events: &mut Vec<DemodEvent>) {
        let filtered = self.rrc.push(self.dc.process(raw));
        let sample = (filtered * INPUT_SCALE)
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        self.ring.push(sample);
        self.envelope_level = self.envelope.process(sample.unsigned_abs() as f32);

        let pos_th = self.positive_threshold();
        let neg_th = -pos_th;

        match self.state {
            DemodState::Init => {
                self.init_count -= 1;
                if self.init_count == 0 {
                    log::debug!("demod: init -> unlocked");
                    self.state = DemodState::Unlocked;
                }
            }

            DemodState::Unlocked => {
                self.lsf_sync.update(&self.ring, pos_th, neg_th);
                self.pkt_sync.update(&self.ring, pos_th, neg_th);

                // The quiet countdown is not re-armed by a loud channel:
                // once it has elapsed, a failed syncword validation drops
                // back here and re-arms on the next sample, which is what
                // lets the hunt continue through an ongoing preamble.
                let quiet = self.lsf_sync.last_corr().unsigned_abs() <= pos_th as u32
                    && self.pkt_sync.last_corr().unsigned_abs() <= pos_th as u32;
                if quiet && self.quiet_count > 0 {
                    self.quiet_count -= 1;
                }
                if self.quiet_count == 0 {
                    log::debug!("demod: unlocked -> armed");
                    self.state = DemodState::Armed;
                }
            }

            DemodState::Armed => {
                let lsf = self.lsf_sync.update(&self.ring, pos_th, neg_th);
                let pkt = self.pkt_sync.update(&self.ring, pos_th, neg_th);

                if lsf == 1 {
                    self.candidate = SyncTag::Lsf;
                    self.sampling_point = self.lsf_sync.sampling_index();
                    self.state = DemodState::Synced;
                } else if pkt == -1 {
                    // The BERT syncword is the packet pattern inverted.
                    self.candidate = SyncTag::Bert;
                    self.sampling_point = self.pkt_sync.sampling_index();
                    self.state = DemodState::Synced;
                } else if lsf == -1 {
                    log::debug!("demod: stream syncword ignored");
                }
            }

            DemodState::Synced => {
                self.deviation = self.ring.max_deviation(self.sampling_point);
                self.frame_symbols = 0;

                // Replay the syncword from correlator memory, picking the
                // samples at the latched phase.
                for age in (0..SYNC_WINDOW).rev() {
                    let abs_idx = self.ring.total() - 1 - age as u64;
                    if (abs_idx % SAMPLES_PER_SYMBOL as u64) as usize == self.sampling_point {
                        let s = self.ring.sample_at_age(age);
                        self.store_symbol(s, events);
                    }
                }

                let distance = crate::frame::soft_hamming(
                    &self.frame[..2 * SYNCWORD_SYMBOLS],
                    &self.candidate.soft_syncword(),
                );
                if distance <= SYNCED_MAX_DISTANCE {
                    log::debug!(
                        "demod: {:?} syncword accepted (distance {distance:.2}), locked",
                        self.candidate
                    );
                    self.locked = true;
                    self.missed_syncs = 0;
                    self.state = DemodState::Locked;
                } else {
                    log::debug!(
                        "demod: {:?} syncword rejected (distance {distance:.2})",
                        self.candidate
                    );
                    self.state = DemodState::Unlocked;
                }
            }

            DemodState::Locked => {
                if self.ring.sample_phase() == self.sampling_point {
                    self.store_symbol(sample, events);
                    if self.frame_symbols == FRAME_SYMBOLS - SYNCWORD_SYMBOLS / 2 {
                        self.state = DemodState::SyncUpdate;
                        self.sync_count = (2 * SYNC_WINDOW) as u32;
                        self.pending = None;
                    }
                }
            }

            DemodState::SyncUpdate => {
                if self.ring.sample_phase() == self.sampling_point {
                    self.store_symbol(sample, events);
                }
                self.sync_update(pos_th, neg_th, events);
            }
        }
    }

    /// Re-synchronization window near a frame boundary: hunt the next
    /// syncword, validate it against the symbols just quantized, and
    /// either refresh the sampling point or fall back.
    fn sync_update(&mut self, pos_th: i32, neg_th: i32, events: &mut Vec<DemodEvent>) {
        let pkt = self.pkt_sync.update(&self.ring, pos_th, neg_th);
        let eot = self.eot_sync.update(&self.ring, pos_th, neg_th);

        // A correlation edge may resolve one sample before the final
        // syncword symbol is sampled, so candidates are parked until the
        // eighth symbol of the next frame has been written.
        if pkt != 0 && (self.frame_symbols == SYNCWORD_SYMBOLS - 1
            || self.frame_symbols == SYNCWORD_SYMBOLS)
        {
            self.pending = Some(PendingSync {
                tag: if pkt == 1 { SyncTag::Pkt } else { SyncTag::Bert },
                sampling_index: self.pkt_sync.sampling_index(),
                deadline: self.ring.total() + SAMPLES_PER_SYMBOL as u64,
            });
        } else if eot == 1
            && (self.frame_symbols == SYNCWORD_SYMBOLS - 1
                || self.frame_symbols == SYNCWORD_SYMBOLS)
        {
            self.pending = Some(PendingSync {
                tag: SyncTag::Eot,
                sampling_index: self.eot_sync.sampling_index(),
                deadline: self.ring.total() + SAMPLES_PER_SYMBOL as u64,
            });
        }

        if let Some(p) = self.pending {
            if self.ring.total() > p.deadline {
                self.pending = None;
            }
        }

        if let Some(p) = self.pending {
            if self.frame_symbols == SYNCWORD_SYMBOLS {
                let distance = crate::frame::soft_hamming(
                    &self.frame[..2 * SYNCWORD_SYMBOLS],
                    &p.tag.soft_syncword(),
                );
                if distance <= RESYNC_MAX_DISTANCE {
                    self.pending = None;
                    if p.tag == SyncTag::Eot {
                        log::debug!("demod: end of transmission (distance {distance:.2})");
                        events.push(DemodEvent::EndOfTransmission);
                        self.drop_lock();
                        return;
                    }
                    log::debug!(
                        "demod: resynchronized on {:?} (distance {distance:.2})",
                        p.tag
                    );
                    // Refresh the amplitude reference from the syncword
                    // window before adopting the new sampling phase.
                    self.deviation = self.ring.max_deviation(self.sampling_point);
                    self.sampling_point = p.sampling_index;
                    self.missed_syncs = 0;
                    self.state = DemodState::Locked;
                    return;
                }
                self.pending = None;
            }
        }

        if self.sync_count == 0 {
            if self.missed_syncs >= MAX_MISSED_SYNCS {
                log::debug!("demod: too many missed syncwords, lock lost");
                self.drop_lock();
            } else {
                log::debug!("demod: no syncword in window, staying locked");
                self.state = DemodState::Locked;
            }
            self.missed_syncs += 1;
        }
        self.sync_count = self.sync_count.saturating_sub(1);
    }

    fn drop_lock(&mut self) {
        self.locked = false;
        self.frame_symbols = 0;
        self.pending = None;
        self.quiet_count = QUIET_SAMPLES;
        self.state = DemodState::Unlocked;
    }

    /// Quantize one symbol sample into two soft-bit slots; emits the frame
    /// when the 192nd symbol lands.
    fn store_symbol(&mut self, sample: i16, events: &mut Vec<DemodEvent>) {
        let (msb, lsb) = quantize_soft(sample as i32, self.deviation.0, self.deviation.1);
        self.frame[2 * self.frame_symbols] = msb;
        self.frame[2 * self.frame_symbols + 1] = lsb;
        self.frame_symbols += 1;

        if self.frame_symbols >= FRAME_SYMBOLS {
            self.frame_symbols = 0;
            let done = std::mem::replace(&mut self.frame, Box::new([0; SOFT_BITS_PER_FRAME]));
            let (tag, distance) = classify_syncword(&done[..2 * SYNCWORD_SYMBOLS]);
            log::debug!("demod: frame complete, {tag:?} (syncword distance {distance:.2})");
            events.push(DemodEvent::Frame { tag, soft: done });
        }
    }
}

/// Map an interval position linearly onto the soft-bit range.
fn linear_map(s: i32, lo: i32, hi: i32, y_lo: i32, y_hi: i32) -> u16 {
    if hi <= lo {
        return y_lo.clamp(0, 0xFFFF) as u16;
    }
    let y = y_lo as i64 + (s - lo) as i64 * (y_hi - y_lo) as i64 / (hi - lo) as i64;
    y.clamp(0, 0xFFFF) as u16
}

/// Soft 4-FSK quantizer. `pos_outer`/`neg_outer` come from the syncword
/// amplitude estimate; the inner decision levels sit one third of the
/// outer span inside them.
pub fn quantize_soft(s: i32, pos_outer: i32, neg_outer: i32) -> (u16, u16) {
    let third = (pos_outer - neg_outer) / 3;
    let inner_pos = pos_outer - third;
    let inner_neg = neg_outer + third;

    if s >= pos_outer {
        (0x0000, 0xFFFF)
    } else if s >= inner_pos {
        (0x0000, linear_map(s, inner_pos, pos_outer, 0, 0xFFFF))
    } else if s >= inner_neg {
        (linear_map(s, inner_neg, inner_pos, 0xFFFF, 0), 0x0000)
    } else if s > neg_outer {
        (0xFFFF, linear_map(s, neg_outer, inner_neg, 0xFFFF, 0))
    } else {
        (0xFFFF, 0xFFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POS: i32 = 1500;
    const NEG: i32 = -1500;

    #[test]
    fn quantizer_extremes() {
        assert_eq!(quantize_soft(2500, POS, NEG), (0x0000, 0xFFFF));
        assert_eq!(quantize_soft(POS, POS, NEG), (0x0000, 0xFFFF));
        assert_eq!(quantize_soft(NEG, POS, NEG), (0xFFFF, 0xFFFF));
        assert_eq!(quantize_soft(-2500, POS, NEG), (0xFFFF, 0xFFFF));
    }

    #[test]
    fn quantizer_nominal_symbols() {
        // With a symmetric +/-1500 reference the inner levels sit at
        // +/-500, exactly on the +/-1 symbol amplitudes.
        assert_eq!(quantize_soft(500, POS, NEG), (0x0000, 0x0000));
        let (msb, lsb) = quantize_soft(-500, POS, NEG);
        assert_eq!(lsb, 0x0000);
        assert!(msb >= 0xFFF0, "msb {msb:#06x}");
    }

    #[test]
    fn quantizer_is_monotonic_in_each_region() {
        let mut prev_lsb = 0u16;
        for s in (500..=1500).step_by(10) {
            let (msb, lsb) = quantize_soft(s, POS, NEG);
            assert_eq!(msb, 0);
            assert!(lsb >= prev_lsb, "lsb regressed at {s}");
            prev_lsb = lsb;
        }
        let mut prev_msb = 0xFFFFu16;
        for s in (-500..=500).step_by(10) {
            let (msb, lsb) = quantize_soft(s, POS, NEG);
            assert_eq!(lsb, 0);
            assert!(msb <= prev_msb, "msb regressed at {s}");
            prev_msb = msb;
        }
    }

    #[test]
    fn quantizer_survives_degenerate_reference() {
        // An empty deviation estimate must not divide by zero.
        let (msb, lsb) = quantize_soft(100, 0, 0);
        assert_eq!((msb, lsb), (0x0000, 0xFFFF));
        let (msb, lsb) = quantize_soft(-100, 0, 0);
        assert_eq!((msb, lsb), (0xFFFF, 0xFFFF));
    }

    #[test]
    fn init_runs_down_to_unlocked() {
        let mut demod = Demodulator::new();
        assert_eq!(demod.state(), DemodState::Init);
        let silence = vec![0.0f32; INIT_SAMPLES as usize];
        demod.update(&silence);
        assert_eq!(demod.state(), DemodState::Unlocked);
        let quiet = vec![0.0f32; QUIET_SAMPLES as usize];
        demod.update(&quiet);
        assert_eq!(demod.state(), DemodState::Armed);
        assert!(!demod.is_locked());
    }
}
