// Command-line interface for vcmerge.
//
// Subcommands mirror the xdelta3 merge workflow: `merge` composes a patch
// chain into one delta, `apply` materializes a delta against a source
// file, `inspect` prints the structure of a delta stream.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::merge::{self, WholeTarget};
use crate::vcdiff::reader::Instruction;
use crate::vcdiff::{DeltaReader, DeltaWriter, WriteOptions};

const DEFAULT_WINDOW_BUDGET: u64 = 1 << 23; // 8 MiB

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// VCDIFF (RFC 3284) delta merging.
#[derive(Parser, Debug)]
#[command(
    name = "vcmerge",
    version,
    about = "Compose chains of VCDIFF deltas into one",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Merge a chain of VCDIFF deltas into a single delta.
    Merge(MergeArgs),
    /// Apply a VCDIFF delta to a source file.
    Apply(ApplyArgs),
    /// Print headers and instructions of a VCDIFF delta.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Patch files to merge, in application order (repeatable).
    #[arg(long = "patch", short = 'p', value_name = "PATCH", value_hint = ValueHint::FilePath, action = ArgAction::Append)]
    patches: Vec<PathBuf>,

    /// Last patch in the chain (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    last_patch: Option<PathBuf>,

    /// Output file for the merged delta.
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,

    /// Write the merged delta to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Soft target-bytes budget per emitted window (supports K/M/G suffix).
    #[arg(long = "window-size", value_parser = parse_byte_size, default_value_t = DEFAULT_WINDOW_BUDGET)]
    window_size: u64,

    /// Application header string to embed in the output.
    #[arg(long = "app-header", value_name = "TEXT")]
    app_header: Option<String>,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Source file the delta was encoded against.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Delta file to apply.
    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,

    /// Output file for the reconstructed target.
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Write the target to stdout.
    #[arg(short = 'c', long)]
    stdout: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Delta file to inspect.
    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn read_patch(path: &Path) -> Result<WholeTarget, String> {
    let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    merge::read_delta(BufReader::new(file)).map_err(|e| format!("{}: {e}", path.display()))
}

fn open_output(path: &Path, force: bool) -> Result<BufWriter<File>, String> {
    if path.exists() && !force {
        return Err(format!(
            "output file exists, use -f to overwrite: {}",
            path.display()
        ));
    }
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| format!("{}: {e}", path.display()))
}

fn cmd_merge(args: &MergeArgs, force: bool, quiet: bool, verbose: u8) -> i32 {
    let mut patches = args.patches.clone();
    if let Some(ref last) = args.last_patch {
        patches.push(last.clone());
    }
    if patches.len() < 2 {
        eprintln!("vcmerge: merge requires at least 2 patches (-p file1 ... fileN)");
        return 1;
    }

    let output_path = match (&args.output, &args.output_pos, args.stdout) {
        (Some(p), _, false) | (None, Some(p), false) => Some(p.clone()),
        (_, _, true) => None,
        (None, None, false) => {
            eprintln!("vcmerge: merge requires an output file (or -c for stdout)");
            return 1;
        }
    };

    let mut accumulator = match read_patch(&patches[0]) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("vcmerge: merge: {e}");
            return 1;
        }
    };

    for (i, path) in patches.iter().enumerate().skip(1) {
        let input = match read_patch(path) {
            Ok(state) => state,
            Err(e) => {
                eprintln!("vcmerge: merge: {e}");
                return 1;
            }
        };
        if let Err(e) = merge::merge_into(&mut accumulator, &input) {
            eprintln!("vcmerge: merge: patch {}: {e}", i + 1);
            return 1;
        }
    }

    let opts = WriteOptions {
        window_budget: args.window_size,
    };
    let mut encoded = Vec::new();
    {
        let mut writer = DeltaWriter::new(&mut encoded);
        if let Some(ref text) = args.app_header {
            writer.set_app_header(text.clone().into_bytes());
        }
        if let Err(e) = writer.write_state(&accumulator, &opts) {
            eprintln!("vcmerge: merge: encode error: {e}");
            return 1;
        }
        if let Err(e) = writer.finish() {
            eprintln!("vcmerge: merge: encode error: {e}");
            return 1;
        }
    }

    let written = match output_path {
        Some(ref path) => {
            let mut out = match open_output(path, force) {
                Ok(w) => w,
                Err(e) => {
                    eprintln!("vcmerge: {e}");
                    return 1;
                }
            };
            out.write_all(&encoded).and_then(|_| out.flush())
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(&encoded).and_then(|_| out.flush())
        }
    };
    if let Err(e) = written {
        eprintln!("vcmerge: merge: write: {e}");
        return 1;
    }

    if verbose > 0 && !quiet {
        eprintln!(
            "vcmerge: merged {} patches: {} instructions, {} target bytes, {} delta bytes",
            patches.len(),
            accumulator.instructions().len(),
            accumulator.len(),
            encoded.len()
        );
    }

    0
}

fn cmd_apply(args: &ApplyArgs, force: bool, quiet: bool, verbose: u8) -> i32 {
    let source = match &args.source {
        Some(path) => match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("vcmerge: source file: {}: {e}", path.display());
                return 1;
            }
        },
        None => Vec::new(),
    };

    let state = match read_patch(&args.delta) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("vcmerge: apply: {e}");
            return 1;
        }
    };

    let target = match state.apply(&source) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("vcmerge: apply: {e}");
            return 1;
        }
    };

    let written = match (&args.output, args.stdout) {
        (Some(path), false) => match open_output(path, force) {
            Ok(mut out) => out.write_all(&target).and_then(|_| out.flush()),
            Err(e) => {
                eprintln!("vcmerge: {e}");
                return 1;
            }
        },
        (None, false) => {
            eprintln!("vcmerge: apply requires an output file (or -c for stdout)");
            return 1;
        }
        _ => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(&target).and_then(|_| out.flush())
        }
    };
    if let Err(e) = written {
        eprintln!("vcmerge: apply: write: {e}");
        return 1;
    }

    if verbose > 0 && !quiet {
        eprintln!("vcmerge: applied: {} target bytes", target.len());
    }

    0
}

fn cmd_inspect(args: &InspectArgs, verbose: u8) -> i32 {
    let file = match File::open(&args.delta) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("vcmerge: inspect: {}: {e}", args.delta.display());
            return 1;
        }
    };

    let mut reader = DeltaReader::new(BufReader::new(file));

    match reader.file_header() {
        Ok(header) => {
            println!("VCDIFF header: indicator {:#04X}", header.flags.bits());
            if let Some(app) = &header.app_header {
                println!("  app header: {} bytes: {}", app.len(), String::from_utf8_lossy(app));
            }
        }
        Err(e) => {
            eprintln!("vcmerge: inspect: {e}");
            return 1;
        }
    }

    let mut index = 0usize;
    loop {
        match reader.next_window() {
            Ok(Some(window)) => {
                index += 1;
                println!(
                    "window {index}: {} instructions, {} target bytes, {} data bytes{}",
                    window.insts.len(),
                    window.target_len(),
                    window.data.len(),
                    if window.copy_len > 0 {
                        format!(
                            ", copy window {}+{} ({})",
                            window.copy_offset,
                            window.copy_len,
                            if window.from_target { "target" } else { "source" }
                        )
                    } else {
                        String::new()
                    }
                );
                if verbose > 0 {
                    print_instructions(&window.insts, window.copy_len);
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("vcmerge: inspect: window {}: {e}", index + 1);
                return 1;
            }
        }
    }

    println!("{index} windows");
    0
}

fn print_instructions(insts: &[Instruction], copy_len: u64) {
    for inst in insts {
        match *inst {
            Instruction::Add { size } => println!("  ADD  {size}"),
            Instruction::Run { size } => println!("  RUN  {size}"),
            Instruction::Copy { size, addr } if addr < copy_len => {
                println!("  CPY  {size} @ {addr} (copy window)");
            }
            Instruction::Copy { size, addr } => {
                println!("  CPY  {size} @ {} (self)", addr - copy_len);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point.  Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    let code = match &cli.command {
        Cmd::Merge(args) => cmd_merge(args, cli.force, cli.quiet, cli.verbose),
        Cmd::Apply(args) => cmd_apply(args, cli.force, cli.quiet, cli.verbose),
        Cmd::Inspect(args) => cmd_inspect(args, cli.verbose),
    };

    process::exit(code)
}
