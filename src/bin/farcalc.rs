//! Offline snapshot merger and FAR-model builder.
//!
//! Merges accumulated statistics snapshots (or raw sample data) into one
//! output container, optionally re-deriving the density and rank models,
//! and prints a JSON summary of the result.

use std::path::PathBuf;
use std::process;

use tracing::{error, info};

use bgfar::checkpoint::SnapshotFile;
use bgfar::density::DensityEstimator;
use bgfar::rank;
use bgfar::stats::{StatsCollection, StatsKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFormat {
    Stats,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockSelect {
    Background,
    Zerolag,
    Signal,
    All,
}

impl BlockSelect {
    fn includes(self, kind: StatsKind) -> bool {
        match self {
            Self::All => true,
            Self::Background => kind == StatsKind::Background,
            Self::Zerolag => kind == StatsKind::Zerolag,
            Self::Signal => kind == StatsKind::Signal,
        }
    }
}

struct Options {
    inputs: Vec<PathBuf>,
    format: InputFormat,
    output: PathBuf,
    ifos: String,
    select: BlockSelect,
    update_pdf: bool,
}

fn usage() -> ! {
    eprintln!(
        "usage: farcalc --input <f1,f2,...> --output <file> --ifos <IFOS> \
         [--input-format stats|data] [--type background|zerolag|signal|all] \
         [--update-pdf]"
    );
    process::exit(1)
}

fn parse_opts() -> Options {
    let mut inputs = Vec::new();
    let mut format = InputFormat::Stats;
    let mut output = None;
    let mut ifos = None;
    let mut select = BlockSelect::All;
    let mut update_pdf = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" | "-i" => {
                let Some(v) = args.next() else { usage() };
                inputs.extend(v.split(',').map(PathBuf::from));
            }
            "--input-format" | "-f" => match args.next().as_deref() {
                Some("stats") => format = InputFormat::Stats,
                Some("data") => format = InputFormat::Data,
                _ => usage(),
            },
            "--output" | "-o" => output = args.next().map(PathBuf::from),
            "--ifos" | "-d" => ifos = args.next(),
            "--type" | "-u" => match args.next().as_deref() {
                Some("background") => select = BlockSelect::Background,
                Some("zerolag") => select = BlockSelect::Zerolag,
                Some("signal") => select = BlockSelect::Signal,
                Some("all") => select = BlockSelect::All,
                _ => usage(),
            },
            "--update-pdf" | "-p" => update_pdf = true,
            _ => usage(),
        }
    }

    let (Some(output), Some(ifos)) = (output, ifos) else {
        usage()
    };
    if inputs.is_empty() {
        usage()
    }
    Options {
        inputs,
        format,
        output,
        ifos,
        select,
        update_pdf,
    }
}

fn fatal(msg: impl std::fmt::Display) -> ! {
    error!("{msg}");
    process::exit(1)
}

/// Element-wise merge of every selected block across all input snapshots.
/// The trials factor of the last input wins, matching interval snapshots
/// that share one configuration.
fn merge_stats(
    opts: &Options,
    bg: &mut StatsCollection,
    zl: &mut StatsCollection,
    sg: &mut StatsCollection,
) -> i64 {
    let mut hist_trials = 1;
    for path in &opts.inputs {
        let snap = match SnapshotFile::load(path) {
            Ok(s) => s,
            Err(e) => fatal(format!("{}: {e}", path.display())),
        };
        hist_trials = snap.hist_trials;
        let blocks = [
            (&snap.background, &mut *bg),
            (&snap.zerolag, &mut *zl),
            (&snap.signal, &mut *sg),
        ];
        for (block, into) in blocks {
            if !opts.select.includes(into.kind) {
                continue;
            }
            let mut staged = match StatsCollection::new(&opts.ifos, into.kind) {
                Ok(s) => s,
                Err(e) => fatal(e),
            };
            if let Err(e) = block.apply(&mut staged) {
                fatal(format!("{}: {e}", path.display()));
            }
            for (node, other) in into.nodes.iter_mut().zip(staged.nodes.iter()) {
                node.merge(other);
            }
        }
        info!(path = %path.display(), "merged snapshot");
    }
    hist_trials
}

/// Reads whitespace-separated "snr chisq" sample lines into the background
/// full-combination node.
fn read_data(opts: &Options, bg: &mut StatsCollection) {
    for path in &opts.inputs {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => fatal(format!("{}: {e}", path.display())),
        };
        let mut nline = 0usize;
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let (Some(snr), Some(chisq)) = (fields.next(), fields.next()) else {
                continue;
            };
            let (Ok(snr), Ok(chisq)) = (snr.parse::<f64>(), chisq.parse::<f64>()) else {
                fatal(format!("{}: bad sample line {:?}", path.display(), line));
            };
            bg.full_node_mut().update(snr, chisq);
            nline += 1;
        }
        info!(path = %path.display(), samples = nline, "read sample data");
    }
}

fn derive_models(stats: &mut StatsCollection) {
    for node in &mut stats.nodes {
        DensityEstimator::AdaptiveKde.estimate(&mut node.feature);
        rank::update_rank(&node.feature, &mut node.rank);
    }
}

fn summary(stats: &StatsCollection) -> serde_json::Value {
    serde_json::json!({
        "kind": stats.kind.label(),
        "nodes": stats
            .nodes
            .iter()
            .map(|n| {
                serde_json::json!({
                    "label": n.label,
                    "nevent": n.nevent,
                    "livetime": n.livetime,
                })
            })
            .collect::<Vec<_>>(),
    })
}

fn main() {
    tracing_subscriber::fmt::init();
    let opts = parse_opts();

    let mut bg = match StatsCollection::new(&opts.ifos, StatsKind::Background) {
        Ok(s) => s,
        Err(e) => fatal(e),
    };
    let mut zl = match StatsCollection::new(&opts.ifos, StatsKind::Zerolag) {
        Ok(s) => s,
        Err(e) => fatal(e),
    };
    let mut sg = match StatsCollection::new(&opts.ifos, StatsKind::Signal) {
        Ok(s) => s,
        Err(e) => fatal(e),
    };

    let hist_trials = match opts.format {
        InputFormat::Stats => merge_stats(&opts, &mut bg, &mut zl, &mut sg),
        InputFormat::Data => {
            read_data(&opts, &mut bg);
            derive_models(&mut bg);
            1
        }
    };

    if opts.update_pdf && opts.format == InputFormat::Stats {
        for stats in [&mut bg, &mut zl, &mut sg] {
            if opts.select.includes(stats.kind) {
                derive_models(stats);
            }
        }
    }

    let snap = SnapshotFile::capture(&opts.ifos, hist_trials, &bg, &zl, &sg);
    if let Err(e) = snap.write(&opts.output) {
        fatal(e);
    }
    info!(path = %opts.output.display(), "wrote merged snapshot");

    let report = serde_json::json!({
        "output": opts.output.display().to_string(),
        "hist_trials": hist_trials,
        "blocks": [summary(&bg), summary(&zl), summary(&sg)],
    });
    println!("{report}");
}
