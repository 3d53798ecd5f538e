use anyhow::Context;
use clap::Parser;
use m17netd::demod::CorrThreshold;
use m17netd::pipeline::RxChain;
use std::io::Read;

#[derive(Parser, Debug)]
#[command(about = "Demodulate f32-LE baseband and print recovered M17 payloads")]
struct Args {
    /// Input file of f32-LE baseband samples; "-" reads stdin.
    #[arg(long, default_value = "-")]
    input: String,

    /// Use a fixed correlation threshold instead of the tracked envelope.
    #[arg(long)]
    fixed_threshold: Option<i32>,

    /// Report BERT statistics every N frames worth of bits.
    #[arg(long, default_value_t = 25)]
    bert_report_frames: u64,
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut input: Box<dyn Read> = if args.input == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(
            std::fs::File::open(&args.input).with_context(|| format!("open {}", args.input))?,
        )
    };

    let threshold = match args.fixed_threshold {
        Some(th) => CorrThreshold::Fixed(th),
        None => CorrThreshold::default(),
    };
    let mut chain = RxChain::with_threshold(threshold);

    let mut delivered = 0u64;
    let mut last_bert_report = 0u64;
    let mut bytes = [0u8; 4096 * 4];
    let mut tail: Vec<u8> = Vec::new();

    loop {
        let n = input.read(&mut bytes).context("read baseband")?;
        if n == 0 {
            break;
        }
        tail.extend_from_slice(&bytes[..n]);
        let whole = tail.len() / 4 * 4;
        let samples: Vec<f32> = tail[..whole]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        tail.drain(..whole);

        for payload in chain.feed(&samples) {
            delivered += 1;
            println!("{}", hex::encode(&payload));
            log::info!("payload {delivered}: {} bytes", payload.len());
        }

        if let Some((tot, err, synced)) = chain.bert_stats() {
            let frames = tot / m17netd::frame::BERT_FRAME_BITS as u64;
            if synced && frames >= last_bert_report + args.bert_report_frames {
                last_bert_report = frames;
                let ber = if tot > 0 { err as f64 / tot as f64 } else { 0.0 };
                eprintln!("bert: {err} errors over {tot} bits (ber {:.2e})", ber);
            }
        }
    }

    if let Some((tot, err, synced)) = chain.bert_stats() {
        eprintln!("bert final: {err} errors over {tot} bits, synced={synced}");
    }
    log::info!("done, {delivered} payloads delivered");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    run(Args::parse())
}
