//! Receive-side plumbing between the demodulator and the network sink,
//! plus the worker loops the bridge threads run. Queues are the only
//! inter-thread channel; every loop polls the shared running flag at each
//! timeout.

use crate::demod::{CorrThreshold, DemodEvent, Demodulator};
use crate::frame::SyncTag;
use crate::queue::{PipeReceiver, PipeSender, RecvStatus, SendStatus};
use crate::rx::{SuperFrame, SuperFrameState};
use crate::tx::{BasebandSource, PacketTx};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Demodulator, frame codec and super-frame assembler chained together:
/// baseband blocks in, validated IPv4 datagrams out.
pub struct RxChain {
    demod: Demodulator,
    current: Option<SuperFrame>,
}

impl Default for RxChain {
    fn default() -> Self {
        Self::new()
    }
}

impl RxChain {
    pub fn new() -> Self {
        Self::with_threshold(CorrThreshold::default())
    }

    pub fn with_threshold(threshold: CorrThreshold) -> Self {
        Self {
            demod: Demodulator::with_threshold(threshold),
            current: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.demod.is_locked()
    }

    /// BERT statistics of the assembler currently collecting them, as
    /// (total bits, errored bits, synchronized).
    pub fn bert_stats(&self) -> Option<(u64, u64, bool)> {
        self.current
            .as_ref()
            .filter(|sf| sf.state() == SuperFrameState::Bert)
            .map(|sf| (sf.bert_totcnt(), sf.bert_errcnt(), sf.bert_synced()))
    }

    /// Feed demodulated baseband; returns the datagrams completed by it.
    pub fn feed(&mut self, baseband: &[f32]) -> Vec<Vec<u8>> {
        let mut delivered = Vec::new();
        for event in self.demod.update(baseband) {
            match event {
                DemodEvent::Frame { tag, soft } => self.on_frame(tag, &soft, &mut delivered),
                DemodEvent::EndOfTransmission => self.on_eot(),
            }
        }
        delivered
    }

    fn on_frame(&mut self, tag: SyncTag, soft: &crate::frame::SoftFrame, out: &mut Vec<Vec<u8>>) {
        match tag {
            SyncTag::Lsf => {
                // A fresh link setup always opens a fresh super-frame;
                // an unfinished one is abandoned.
                if let Some(old) = &self.current {
                    if old.state() == SuperFrameState::LsfReceived {
                        log::warn!("rx: link setup interrupted an unfinished super-frame");
                    }
                }
                self.current = Some(SuperFrame::new());
            }
            SyncTag::Bert if self.current.is_none() => {
                self.current = Some(SuperFrame::new());
            }
            _ if self.current.is_none() => {
                log::debug!("rx: {tag:?} frame with no open super-frame, dropped");
                return;
            }
            _ => {}
        }

        let Some(sf) = self.current.as_mut() else {
            return;
        };
        sf.add_frame(tag, soft);

        if sf.is_complete() {
            let payload = sf.payload();
            log::info!(
                "rx: super-frame complete, {} payload bytes, {} corrected bits",
                payload.len(),
                sf.corrected_bits()
            );
            if !payload.is_empty() {
                out.push(payload);
            }
            self.current = None;
        } else if sf.is_error() {
            log::warn!("rx: super-frame dropped in error state");
            self.current = None;
        }
    }

    fn on_eot(&mut self) {
        match self.current.as_ref().map(|sf| sf.state()) {
            Some(SuperFrameState::Bert) => {
                // Keep the BERT assembler: its counters span the session.
                if let Some((tot, err, synced)) = self.bert_stats() {
                    log::info!("rx: bert stream ended, {err}/{tot} errors, synced={synced}");
                }
            }
            Some(_) => {
                log::warn!("rx: transmission ended before the super-frame completed");
                self.current = None;
            }
            None => {}
        }
    }
}

/// Radio-side receive worker: demodulates baseband blocks from the radio
/// queue and forwards datagrams to the network writer.
pub fn rx_worker(
    running: Arc<AtomicBool>,
    from_radio: PipeReceiver<Vec<f32>>,
    to_net: PipeSender<Vec<u8>>,
) {
    let mut chain = RxChain::new();
    while running.load(Ordering::Relaxed) {
        let block = match from_radio.dequeue() {
            RecvStatus::Item(block) => block,
            RecvStatus::TimedOut => continue,
            RecvStatus::Closed => break,
        };
        for payload in chain.feed(&block) {
            let mut item = payload;
            loop {
                match to_net.enqueue(item) {
                    SendStatus::Sent => break,
                    SendStatus::TimedOut(back) => {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        item = back;
                    }
                    SendStatus::Closed(_) => return,
                }
            }
        }
    }
    log::info!("rx worker stopped");
}

/// Network-side transmit builder: wraps outbound datagrams into packet
/// super-frames addressed to the destination callsign.
pub fn tx_builder_worker(
    running: Arc<AtomicBool>,
    src_callsign: String,
    from_net: PipeReceiver<(String, Vec<u8>)>,
    to_radio: PipeSender<Box<dyn BasebandSource + Send>>,
) {
    while running.load(Ordering::Relaxed) {
        let (dst, datagram) = match from_net.dequeue() {
            RecvStatus::Item(item) => item,
            RecvStatus::TimedOut => continue,
            RecvStatus::Closed => break,
        };
        let tx = match PacketTx::new(&src_callsign, &dst, &datagram) {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("tx builder: dropping datagram for {dst}: {e}");
                continue;
            }
        };
        log::debug!(
            "tx builder: {} byte datagram for {dst}, {} symbols",
            datagram.len(),
            tx.symbols().len()
        );
        let mut item: Box<dyn BasebandSource + Send> = Box::new(tx);
        loop {
            match to_radio.enqueue(item) {
                SendStatus::Sent => break,
                SendStatus::TimedOut(back) => {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    item = back;
                }
                SendStatus::Closed(_) => return,
            }
        }
    }
    log::info!("tx builder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::pipe;
    use std::time::Duration;

    #[test]
    fn workers_exit_on_shutdown_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let (radio_tx, radio_rx) = pipe::<Vec<f32>>(2, Duration::from_millis(20));
        let (net_tx, net_rx) = pipe::<Vec<u8>>(2, Duration::from_millis(20));

        let flag = running.clone();
        let handle = std::thread::spawn(move || rx_worker(flag, radio_rx, net_tx));

        assert!(matches!(
            radio_tx.enqueue(vec![0.0f32; 256]),
            SendStatus::Sent
        ));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
        let _ = net_rx;
    }

    #[test]
    fn tx_builder_produces_a_superframe() {
        let running = Arc::new(AtomicBool::new(true));
        let (net_tx, net_rx) = pipe::<(String, Vec<u8>)>(2, Duration::from_millis(20));
        let (radio_tx, radio_rx) =
            pipe::<Box<dyn BasebandSource + Send>>(2, Duration::from_millis(20));

        let flag = running.clone();
        let handle =
            std::thread::spawn(move || tx_builder_worker(flag, "TEST".into(), net_rx, radio_tx));

        assert!(matches!(
            net_tx.enqueue(("KIWI".into(), vec![0x45u8; 40])),
            SendStatus::Sent
        ));
        let built = loop {
            match radio_rx.dequeue() {
                RecvStatus::Item(item) => break item,
                RecvStatus::TimedOut => continue,
                RecvStatus::Closed => panic!("builder died"),
            }
        };
        // Preamble + LSF + 2 packet frames + EOT.
        assert_eq!(built.symbols().len(), 5 * crate::frame::FRAME_SYMBOLS);

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
