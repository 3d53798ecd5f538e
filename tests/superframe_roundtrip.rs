//! Symbol-level round trips: the transmit synthesizer's symbol stream is
//! inverted straight back into soft-bit frames (no channel, no filters)
//! and reassembled.

use m17netd::frame::{
    symbol_to_dibits, SoftFrame, SyncTag, FRAME_SYMBOLS, SOFT_BITS_PER_FRAME, SYNCWORD_SYMBOLS,
};
use m17netd::rx::SuperFrame;
use m17netd::tx::{BasebandSource, PacketTx};

/// Split a transmitted symbol stream into tagged soft-bit frames,
/// stopping at the end-of-transmission marker.
fn symbols_to_frames(symbols: &[f32]) -> Vec<(SyncTag, SoftFrame)> {
    let mut frames = Vec::new();
    // Skip the preamble frame.
    for chunk in symbols.chunks_exact(FRAME_SYMBOLS).skip(1) {
        let head: Vec<i8> = chunk[..SYNCWORD_SYMBOLS].iter().map(|&s| s as i8).collect();
        let tag = SyncTag::ALL
            .into_iter()
            .find(|t| t.symbols()[..] == head[..])
            .expect("unknown syncword in symbol stream");
        if tag == SyncTag::Eot {
            break;
        }

        let mut soft = [0u16; SOFT_BITS_PER_FRAME];
        for (i, &sym) in chunk.iter().enumerate() {
            let (msb, lsb) = symbol_to_dibits(sym as i8);
            soft[2 * i] = if msb != 0 { 0xFFFF } else { 0x0000 };
            soft[2 * i + 1] = if lsb != 0 { 0xFFFF } else { 0x0000 };
        }
        frames.push((tag, soft));
    }
    frames
}

fn roundtrip(payload: &[u8]) -> SuperFrame {
    let tx = PacketTx::new("TEST", "KIWI", payload).expect("build tx");
    let mut sf = SuperFrame::new();
    for (tag, soft) in symbols_to_frames(tx.symbols()) {
        sf.add_frame(tag, &soft);
    }
    sf
}

#[test]
fn ipv4_header_sized_payload() {
    let mut payload = vec![0x45, 0x00, 0x00, 0x28];
    payload.extend((0..36u8).map(|v| v.wrapping_mul(7)));
    assert_eq!(payload.len(), 40);

    let sf = roundtrip(&payload);
    assert!(sf.is_complete());
    assert!(sf.is_valid());
    assert_eq!(sf.payload(), payload);
    assert_eq!(sf.corrected_bits(), 0);
}

#[test]
fn single_byte_payload() {
    let sf = roundtrip(&[0xA7]);
    assert!(sf.is_valid());
    assert_eq!(sf.payload(), vec![0xA7]);
}

#[test]
fn single_frame_boundary_payload() {
    // 22 bytes plus specifier and CRC exactly fill one 25-byte frame.
    let payload: Vec<u8> = (0..22u8).collect();
    let tx = PacketTx::new("TEST", "KIWI", &payload).expect("build tx");
    let frames = symbols_to_frames(tx.symbols());
    assert_eq!(frames.len(), 2, "LSF plus exactly one packet frame");

    let mut sf = SuperFrame::new();
    for (tag, soft) in frames {
        sf.add_frame(tag, &soft);
    }
    assert_eq!(sf.payload(), payload);
}

#[test]
fn maximum_payload_spans_33_frames() {
    let payload: Vec<u8> = (0..820u16).map(|v| (v % 251) as u8).collect();
    let tx = PacketTx::new("TEST", "KIWI", &payload).expect("build tx");
    let frames = symbols_to_frames(tx.symbols());
    assert_eq!(frames.len(), 34, "LSF plus 33 packet frames");

    let mut sf = SuperFrame::new();
    for (tag, soft) in frames {
        sf.add_frame(tag, &soft);
    }
    assert!(sf.is_valid());
    assert_eq!(sf.payload(), payload);
}

#[test]
fn lsf_carries_the_addressing() {
    let tx = PacketTx::new("TEST", "KIWI", &[1, 2, 3]).expect("build tx");
    let mut sf = SuperFrame::new();
    for (tag, soft) in symbols_to_frames(tx.symbols()) {
        sf.add_frame(tag, &soft);
    }
    let lsf = m17netd::frame::LinkSetup::from_bytes(*sf.lsf());
    assert_eq!(lsf.source(), "TEST");
    assert_eq!(lsf.destination(), "KIWI");
    assert_eq!(lsf.type_field(), 0x0005);
    assert!(lsf.crc_ok());
}
