//! Super-frame assembler: collects the decoded frames of one packet-mode
//! transmission (LSF, packet frames, terminator) and exposes the carried
//! IPv4 datagram once complete and validated.

use crate::bert::BertReceiver;
use crate::crc::crc_m17_check;
use crate::fec;
use crate::frame::{
    bits_to_bytes, SoftFrame, SyncTag, BERT_FRAME_BITS, IPV4_SPECIFIER, LSF_BYTES,
    LSF_TYPE1_BITS, PKT_CHUNK_BYTES, PKT_FRAME_BYTES, PKT_TYPE1_BITS,
    SOFT_BITS_PER_PAYLOAD, SOFT_BITS_PER_SYNCWORD,
};
use crate::interleave::deinterleave_soft;
use crate::scramble::derandomize_soft;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuperFrameState {
    Empty,
    LsfReceived,
    PktComplete,
    Bert,
    Error,
}

#[derive(Debug)]
pub struct SuperFrame {
    state: SuperFrameState,
    lsf: [u8; LSF_BYTES],
    pkt_data: Vec<u8>,
    corrected: u32,
    received_frames: usize,
    bert: BertReceiver,
}

impl Default for SuperFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl SuperFrame {
    pub fn new() -> Self {
        Self {
            state: SuperFrameState::Empty,
            lsf: [0; LSF_BYTES],
            pkt_data: Vec::with_capacity(PKT_CHUNK_BYTES),
            corrected: 0,
            received_frames: 0,
            bert: BertReceiver::new(),
        }
    }

    pub fn state(&self) -> SuperFrameState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == SuperFrameState::PktComplete
    }

    pub fn is_error(&self) -> bool {
        self.state == SuperFrameState::Error
    }

    /// Complete and carrying an intact link setup frame.
    pub fn is_valid(&self) -> bool {
        self.is_complete() && crc_m17_check(&self.lsf)
    }

    /// Raw LSF bytes; unvalidated, check `is_valid` or the CRC yourself.
    pub fn lsf(&self) -> &[u8; LSF_BYTES] {
        &self.lsf
    }

    /// Total distance the Viterbi paths had to make up, in whole bits.
    pub fn corrected_bits(&self) -> u32 {
        self.corrected
    }

    pub fn bert_synced(&self) -> bool {
        self.bert.synced()
    }

    pub fn bert_totcnt(&self) -> u64 {
        self.bert.totcnt()
    }

    pub fn bert_errcnt(&self) -> u64 {
        self.bert.errcnt()
    }

    fn fail(&mut self, why: &str) {
        log::warn!("superframe: {why}");
        self.state = SuperFrameState::Error;
    }

    /// Feed one demodulated frame. The payload is derandomized,
    /// deinterleaved and Viterbi-decoded according to the tag; sequencing
    /// faults latch the ERROR state.
    pub fn add_frame(&mut self, tag: SyncTag, frame: &SoftFrame) {
        if self.state == SuperFrameState::Error {
            return;
        }
        if self.state == SuperFrameState::PktComplete {
            self.fail("frame after completed packet");
            return;
        }

        let mut payload = [0u16; SOFT_BITS_PER_PAYLOAD];
        payload.copy_from_slice(&frame[SOFT_BITS_PER_SYNCWORD..]);
        derandomize_soft(&mut payload);
        let payload = deinterleave_soft(&payload);

        match tag {
            SyncTag::Lsf => self.add_lsf(&payload),
            SyncTag::Pkt => self.add_pkt(&payload),
            SyncTag::Bert => self.add_bert(&payload),
            SyncTag::Eot | SyncTag::Str => {
                self.fail("unexpected frame kind");
            }
        }
    }

    fn add_lsf(&mut self, payload: &[u16; SOFT_BITS_PER_PAYLOAD]) {
        if self.state != SuperFrameState::Empty {
            self.fail("link setup frame inside an open super-frame");
            return;
        }
        let (bits, corrected) = fec::decode_punctured(payload, &fec::PUNCTURE_LSF, LSF_TYPE1_BITS);
        self.lsf.copy_from_slice(&bits_to_bytes(&bits));
        self.corrected += corrected;
        self.state = SuperFrameState::LsfReceived;
    }

    fn add_pkt(&mut self, payload: &[u16; SOFT_BITS_PER_PAYLOAD]) {
        if self.state != SuperFrameState::LsfReceived {
            self.fail("packet frame without link setup");
            return;
        }
        let (bits, corrected) = fec::decode_punctured(payload, &fec::PUNCTURE_PKT, PKT_TYPE1_BITS);
        self.corrected += corrected;
        // 206 bits: 25 data bytes, then the control byte's top six bits.
        let mut padded = bits;
        padded.resize(PKT_FRAME_BYTES * 8, 0);
        let bytes = bits_to_bytes(&padded);
        let control = bytes[PKT_FRAME_BYTES - 1];

        if control & 0x80 != 0 {
            let remaining = ((control >> 2) & 0x1F) as usize;
            if remaining > PKT_CHUNK_BYTES {
                self.fail("final frame length out of range");
                return;
            }
            self.pkt_data.extend_from_slice(&bytes[..remaining]);
            self.state = SuperFrameState::PktComplete;
        } else {
            // The 5-bit index must run 0, 1, 2, ...; it also bounds a
            // super-frame at 32 indexed frames plus the final one.
            let index = ((control >> 2) & 0x1F) as usize;
            if index != self.received_frames {
                self.fail("packet frame out of sequence");
                return;
            }
            self.pkt_data
                .extend_from_slice(&bytes[..PKT_CHUNK_BYTES]);
        }
        self.received_frames += 1;
    }

    fn add_bert(&mut self, payload: &[u16; SOFT_BITS_PER_PAYLOAD]) {
        if self.state != SuperFrameState::Empty && self.state != SuperFrameState::Bert {
            self.fail("bert frame inside a packet super-frame");
            return;
        }
        self.state = SuperFrameState::Bert;
        let (bits, corrected) =
            fec::decode_punctured(payload, &fec::PUNCTURE_BERT, BERT_FRAME_BITS);
        self.corrected += corrected;
        self.bert.process_frame(&bits);
    }

    /// The carried IPv4 datagram, with the data-type specifier and the
    /// trailing CRC stripped. Empty unless the super-frame is valid, the
    /// specifier marks IPv4, and the payload CRC holds.
    pub fn payload(&self) -> Vec<u8> {
        if !self.is_valid() {
            return Vec::new();
        }
        // Specifier, at least nothing, and a 16-bit CRC; anything shorter
        // cannot carry a datagram.
        if self.pkt_data.len() < 4 {
            return Vec::new();
        }
        if self.pkt_data[0] != IPV4_SPECIFIER {
            log::warn!(
                "superframe: unsupported data-type specifier 0x{:02X}",
                self.pkt_data[0]
            );
            return Vec::new();
        }
        if !crc_m17_check(&self.pkt_data) {
            log::warn!("superframe: payload crc mismatch, dropping");
            return Vec::new();
        }
        self.pkt_data[1..self.pkt_data.len() - 2].to_vec()
    }
}
