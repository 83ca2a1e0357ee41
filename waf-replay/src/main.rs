use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use waf_engine::aggregate::{self, TimeRange};
use waf_engine::{ConfigLoader, Firewall, LogEntry, Request};

#[derive(Parser, Debug)]
#[command(name = "waf-replay")]
#[command(about = "Replay a request log through the WAF engine and print traffic rollups")]
struct Args {
    /// Request log, one `IP METHOD TARGET [RFC3339]` per line (`-` for stdin)
    #[arg(long, short = 'i', default_value = "-")]
    input: String,

    /// Config file path (built-in rules when omitted)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Histogram bucket width in seconds
    #[arg(long, default_value = "60")]
    bucket_secs: u32,

    /// Write every decision as JSON lines to this file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::load_or_builtin(args.config.clone())?;

    let level = if config.debug_logging(args.verbose) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .init();

    let firewall = Firewall::from_config(&config)?;

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input).with_context(|| format!("opening {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    // The stream only keeps its newest entries, so rollups run over our own copy
    let mut decisions: Vec<LogEntry> = Vec::new();
    let mut skipped = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Request::parse_line(line) {
            Ok(request) => decisions.push(firewall.classify(&request)),
            Err(e) => {
                tracing::warn!("line {}: {}", lineno + 1, e);
                skipped += 1;
            }
        }
    }

    if let Some(path) = &args.export {
        export(path, &decisions)?;
    }

    report(&firewall, &decisions, &args, skipped)
}

fn export(path: &PathBuf, decisions: &[LogEntry]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for entry in decisions {
        serde_json::to_writer(&mut out, entry)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    tracing::info!("Exported {} decisions to {}", decisions.len(), path.display());
    Ok(())
}

fn report(
    firewall: &Firewall,
    decisions: &[LogEntry],
    args: &Args,
    skipped: usize,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let summary = aggregate::summary(decisions);
    writeln!(out, "Requests:  {}", summary.total)?;
    writeln!(out, "  allowed: {}", summary.allowed)?;
    writeln!(out, "  flagged: {}", summary.flagged)?;
    writeln!(out, "  blocked: {}", summary.blocked)?;
    writeln!(out, "  alerts:  {}", summary.alerts)?;
    if skipped > 0 {
        writeln!(out, "Skipped:   {} malformed lines", skipped)?;
    }

    let Some(range) = TimeRange::covering(decisions) else {
        return Ok(());
    };

    let width = chrono::Duration::seconds(i64::from(args.bucket_secs.max(1)));
    writeln!(out)?;
    writeln!(out, "Traffic per {}s:", width.num_seconds())?;
    for bucket in aggregate::bucketize(decisions, range, width)? {
        writeln!(
            out,
            "  {}  total {:>6}  blocked {:>6}",
            bucket.start.format("%Y-%m-%d %H:%M:%S"),
            bucket.total,
            bucket.blocked
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Attack categories:")?;
    let categories = aggregate::by_category(decisions, &firewall.list_rules());
    if categories.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for (category, count) in categories {
        writeln!(out, "  {:<24} {}", category, count)?;
    }

    writeln!(out)?;
    writeln!(out, "Threat levels:")?;
    for (level, count) in aggregate::by_threat_level(decisions) {
        writeln!(out, "  {:<24} {}", level.to_string(), count)?;
    }
    Ok(())
}
