//! Transmit-side frame and super-frame synthesis: link setup, packet and
//! BERT frames encoded to symbols, then interpolated through the RRC
//! filter into 96 kHz baseband.

use crate::bert::Prbs9;
use crate::crc::crc_m17;
use crate::fec;
use crate::frame::{
    bytes_to_bits, dibits_to_symbol, LinkSetup, SyncTag, BERT_FRAME_BITS, FRAME_SYMBOLS,
    IPV4_SPECIFIER, MAX_PACKET_PAYLOAD, PKT_CHUNK_BYTES, PKT_FRAME_BYTES, PKT_TYPE1_BITS,
    SAMPLES_PER_SYMBOL, SOFT_BITS_PER_PAYLOAD,
};
use crate::interleave::interleave_bits;
use crate::rrc::{modem_taps, FirState, RRC_TAPS};
use crate::scramble::randomize_bits;

/// Anything that can stream a transmission as baseband blocks. A short
/// read signals the end of the stream.
pub trait BasebandSource {
    /// Up to `n` more baseband samples.
    fn baseband_samples(&mut self, n: usize) -> Vec<f32>;
    /// Samples known to remain; a live BERT stream reports only what is
    /// currently materialized.
    fn samples_left(&self) -> usize;
    /// The full symbol stream synthesized so far.
    fn symbols(&self) -> &[f32];
}

/// Encode 368 on-air payload bits from type-1 bits: convolutional code,
/// puncturing, interleaving, randomizing.
pub fn encode_payload(type1: &[u8], pattern: &[u8]) -> [u8; SOFT_BITS_PER_PAYLOAD] {
    let coded = fec::puncture(&fec::conv_encode(type1), pattern, SOFT_BITS_PER_PAYLOAD);
    let mut bits = [0u8; SOFT_BITS_PER_PAYLOAD];
    bits.copy_from_slice(&coded);
    let mut bits = interleave_bits(&bits);
    randomize_bits(&mut bits);
    bits
}

fn push_frame(symbols: &mut Vec<f32>, tag: SyncTag, payload_bits: &[u8; SOFT_BITS_PER_PAYLOAD]) {
    for sym in tag.symbols() {
        symbols.push(sym as f32);
    }
    for pair in payload_bits.chunks_exact(2) {
        symbols.push(dibits_to_symbol(pair[0], pair[1]) as f32);
    }
}

/// One frame of alternating outer symbols ahead of the first syncword.
fn push_preamble(symbols: &mut Vec<f32>) {
    for i in 0..FRAME_SYMBOLS {
        symbols.push(if i % 2 == 0 { 3.0 } else { -3.0 });
    }
}

/// End-of-transmission marker: the EOT syncword repeated for a frame.
fn push_eot(symbols: &mut Vec<f32>) {
    let eot = SyncTag::Eot.symbols();
    for _ in 0..FRAME_SYMBOLS / eot.len() {
        for sym in eot {
            symbols.push(sym as f32);
        }
    }
}

/// Zero-stuffing interpolator: one symbol enters the RRC delay line every
/// 20 output samples, plus half a filter length of tail.
#[derive(Debug)]
struct RrcInterpolator {
    fir: FirState,
    phase: usize,
    fed: usize,
    produced: usize,
}

impl RrcInterpolator {
    fn new() -> Self {
        Self {
            fir: FirState::new(modem_taps()),
            phase: 0,
            fed: 0,
            produced: 0,
        }
    }

    fn output_len(symbol_count: usize) -> usize {
        symbol_count * SAMPLES_PER_SYMBOL + RRC_TAPS / 2
    }

    fn next(&mut self, symbols: &[f32]) -> f32 {
        let x = if self.phase == 0 && self.fed < symbols.len() {
            let v = symbols[self.fed];
            self.fed += 1;
            v
        } else {
            0.0
        };
        self.phase = (self.phase + 1) % SAMPLES_PER_SYMBOL;
        self.produced += 1;
        self.fir.push(x)
    }
}

/// A complete packet-mode super-frame for one IPv4 datagram.
pub struct PacketTx {
    symbols: Vec<f32>,
    interp: RrcInterpolator,
}

impl PacketTx {
    pub fn new(src: &str, dst: &str, ip_pkt: &[u8]) -> anyhow::Result<Self> {
        if ip_pkt.len() > MAX_PACKET_PAYLOAD {
            anyhow::bail!(
                "datagram of {} bytes exceeds the {} byte super-frame capacity",
                ip_pkt.len(),
                MAX_PACKET_PAYLOAD
            );
        }

        let lsf = LinkSetup::new_packet(src, dst)?;

        // Type specifier, datagram, then a CRC over both.
        let mut combined = Vec::with_capacity(ip_pkt.len() + 3);
        combined.push(IPV4_SPECIFIER);
        combined.extend_from_slice(ip_pkt);
        combined.extend_from_slice(&crc_m17(&combined).to_be_bytes());

        let n_frames = combined.len().div_ceil(PKT_CHUNK_BYTES);
        let mut symbols = Vec::with_capacity((n_frames + 3) * FRAME_SYMBOLS);

        push_preamble(&mut symbols);
        push_frame(
            &mut symbols,
            SyncTag::Lsf,
            &encode_payload(&bytes_to_bits(&lsf.bytes), &fec::PUNCTURE_LSF),
        );

        for (i, chunk) in combined.chunks(PKT_CHUNK_BYTES).enumerate() {
            let mut data = [0u8; PKT_FRAME_BYTES];
            data[..chunk.len()].copy_from_slice(chunk);
            data[PKT_FRAME_BYTES - 1] = if i == n_frames - 1 {
                0x80 | ((chunk.len() as u8) << 2)
            } else {
                (i as u8) << 2
            };
            let bits = bytes_to_bits(&data);
            push_frame(
                &mut symbols,
                SyncTag::Pkt,
                &encode_payload(&bits[..PKT_TYPE1_BITS], &fec::PUNCTURE_PKT),
            );
        }

        push_eot(&mut symbols);

        Ok(Self {
            symbols,
            interp: RrcInterpolator::new(),
        })
    }
}

impl BasebandSource for PacketTx {
    fn baseband_samples(&mut self, n: usize) -> Vec<f32> {
        let total = RrcInterpolator::output_len(self.symbols.len());
        let mut out = Vec::with_capacity(n);
        while out.len() < n && self.interp.produced < total {
            out.push(self.interp.next(&self.symbols));
        }
        out
    }

    fn samples_left(&self) -> usize {
        RrcInterpolator::output_len(self.symbols.len()) - self.interp.produced
    }

    fn symbols(&self) -> &[f32] {
        &self.symbols
    }
}

/// Continuous BERT stream: preamble, then BERT frames until terminated,
/// then an end-of-transmission marker.
pub struct BertTx {
    symbols: Vec<f32>,
    gen: Prbs9,
    interp: RrcInterpolator,
    terminated: bool,
}

impl Default for BertTx {
    fn default() -> Self {
        Self::new()
    }
}

impl BertTx {
    pub fn new() -> Self {
        let mut symbols = Vec::with_capacity(4 * FRAME_SYMBOLS);
        push_preamble(&mut symbols);
        let mut tx = Self {
            symbols,
            gen: Prbs9::new(1),
            interp: RrcInterpolator::new(),
            terminated: false,
        };
        tx.append_frame();
        tx
    }

    fn append_frame(&mut self) {
        let mut bits = [0u8; BERT_FRAME_BITS];
        for b in bits.iter_mut() {
            *b = self.gen.next_bit();
        }
        push_frame(
            &mut self.symbols,
            SyncTag::Bert,
            &encode_payload(&bits, &fec::PUNCTURE_BERT),
        );
    }

    /// Queue the end-of-transmission marker; the stream drains after it.
    pub fn terminate_stream(&mut self) {
        if !self.terminated {
            push_eot(&mut self.symbols);
            self.terminated = true;
        }
    }
}

impl BasebandSource for BertTx {
    fn baseband_samples(&mut self, n: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            // Keep a frame of margin in front of the interpolator.
            if !self.terminated && self.interp.fed + FRAME_SYMBOLS >= self.symbols.len() {
                self.append_frame();
            }
            let total = RrcInterpolator::output_len(self.symbols.len());
            if self.terminated && self.interp.produced >= total {
                break;
            }
            out.push(self.interp.next(&self.symbols));
        }
        out
    }

    fn samples_left(&self) -> usize {
        RrcInterpolator::output_len(self.symbols.len()) - self.interp.produced
    }

    fn symbols(&self) -> &[f32] {
        &self.symbols
    }
}
