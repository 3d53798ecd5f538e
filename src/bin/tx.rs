use anyhow::Context;
use clap::Parser;
use m17netd::config::Config;
use m17netd::frame::{FRAME_SYMBOLS, SAMPLES_PER_SYMBOL};
use m17netd::tx::{BasebandSource, BertTx, PacketTx};
use std::io::Write;

#[derive(Parser, Debug)]
#[command(about = "Render an M17 packet or BERT super-frame to f32-LE baseband")]
struct Args {
    /// Source callsign; overridden by --config when given.
    #[arg(long, default_value = "N0CALL")]
    src: String,

    /// Destination callsign.
    #[arg(long, default_value = "@ALL")]
    dst: String,

    /// Node configuration (TOML); provides the source callsign.
    #[arg(long)]
    config: Option<String>,

    /// Datagram to send, as hex. Mutually exclusive with --bert-frames.
    #[arg(long)]
    payload_hex: Option<String>,

    /// Transmit a BERT stream of this many frames instead of a packet.
    #[arg(long, default_value_t = 0)]
    bert_frames: u32,

    /// Silence inserted before and after the transmission (milliseconds).
    #[arg(long, default_value_t = 100.0)]
    lead_ms: f64,

    /// Output file; "-" writes to stdout.
    #[arg(long, default_value = "-")]
    out: String,
}

fn write_samples(w: &mut dyn Write, samples: &[f32]) -> anyhow::Result<()> {
    let mut buf = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    w.write_all(&buf).context("write baseband")
}

fn drain(source: &mut dyn BasebandSource, out: &mut dyn Write) -> anyhow::Result<()> {
    loop {
        let block = source.baseband_samples(4096);
        write_samples(out, &block)?;
        if block.len() < 4096 {
            return Ok(());
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let src = match &args.config {
        Some(path) => Config::from_file(path)?.general.callsign,
        None => args.src.clone(),
    };

    let mut out: Box<dyn Write> = if args.out == "-" {
        Box::new(std::io::stdout().lock())
    } else {
        Box::new(std::fs::File::create(&args.out).with_context(|| format!("create {}", args.out))?)
    };

    let lead = vec![0.0f32; (args.lead_ms * 96.0) as usize];
    write_samples(&mut *out, &lead)?;

    if args.bert_frames > 0 {
        log::info!("bert stream of {} frames", args.bert_frames);
        let mut bert = BertTx::new();
        // Preamble plus the requested frames, then the end marker.
        let mut remaining =
            (args.bert_frames as usize + 1) * FRAME_SYMBOLS * SAMPLES_PER_SYMBOL;
        while remaining > 0 {
            let block = bert.baseband_samples(remaining.min(4096));
            remaining -= block.len();
            write_samples(&mut *out, &block)?;
        }
        bert.terminate_stream();
        drain(&mut bert, &mut *out)?;
    } else {
        let payload = match &args.payload_hex {
            Some(h) => hex::decode(h).context("invalid --payload-hex")?,
            None => anyhow::bail!("either --payload-hex or --bert-frames is required"),
        };
        log::info!(
            "packet super-frame {src} -> {}, {} payload bytes",
            args.dst,
            payload.len()
        );
        let mut tx = PacketTx::new(&src, &args.dst, &payload)?;
        drain(&mut tx, &mut *out)?;
    }

    write_samples(&mut *out, &lead)?;
    out.flush().context("flush output")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    run(Args::parse())
}
