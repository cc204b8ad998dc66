use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use paperstore::{
    decode_file, encode_file, scan_input, DecodeOptions, EcLevel, EncodeOptions, PageLayout,
    PageSourceMode, Paper, Progress, Record, Stage, SymbolSpec,
};

#[derive(Parser)]
#[command(name = "paperstore")]
#[command(author, version, about = "Back up files on paper as QR codes and restore them from scans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug details
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Don't draw progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Args)]
struct EncodeArgs {
    /// File to back up
    input: PathBuf,

    /// PDF to create
    output: PathBuf,

    /// QR error-correction level
    #[arg(long, value_enum, default_value_t = EcLevel::Q, env = "PAPERSTORE_EC")]
    ec: EcLevel,

    /// QR version (symbol size), 1-40
    #[arg(long, default_value_t = 40, value_parser = clap::value_parser!(u8).range(1..=40))]
    qr_version: u8,

    /// Payload bytes per QR code. Defaults to the most the symbol holds.
    #[arg(short = 's', long)]
    chunk_size: Option<usize>,

    /// QR codes per row
    #[arg(long, default_value_t = 2)]
    columns: u32,

    /// QR codes per column
    #[arg(long, default_value_t = 3)]
    rows: u32,

    /// Page margin in millimetres
    #[arg(long, default_value_t = 8.0)]
    margin_mm: f32,

    #[arg(long, value_enum, default_value_t = Paper::A4, env = "PAPERSTORE_PAPER")]
    paper: Paper,

    /// Pixels per QR module in the embedded images
    #[arg(long, default_value_t = 4)]
    pixel_scale: u32,

    /// zlib-compress the file before encoding
    #[arg(short, long)]
    compress: bool,

    /// Leave out the manifest symbol (filename, size, SHA-256)
    #[arg(long)]
    no_manifest: bool,

    /// Page header text (defaults to the input filename)
    #[arg(long)]
    title: Option<String>,
}

#[derive(Args)]
struct SourceArgs {
    /// Render PDF pages with pdfium instead of reading their embedded images
    #[arg(long)]
    rasterize: bool,

    /// Resolution for --rasterize
    #[arg(long, default_value_t = 300)]
    dpi: u32,
}

impl SourceArgs {
    fn options(&self) -> DecodeOptions {
        DecodeOptions {
            source: if self.rasterize {
                PageSourceMode::Rasterize
            } else {
                PageSourceMode::EmbeddedImages
            },
            dpi: self.dpi,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file into a printable PDF of QR codes
    Encode(EncodeArgs),

    /// Restore a file from a PDF, a directory of page scans, or one image
    Decode {
        /// PDF, directory of images, or image file
        input: PathBuf,

        /// Output file, or directory to restore the original filename into
        output: PathBuf,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// List the symbols found in a PDF or scans without restoring anything
    Inspect {
        /// PDF, directory of images, or image file
        input: PathBuf,

        #[command(flatten)]
        source: SourceArgs,
    },
}

struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(enabled: bool) -> Self {
        let bar = if enabled {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }
}

impl Progress for CliProgress {
    fn start(&self, stage: Stage, total: usize) {
        let template = format!(
            "{{prefix:.bold}} [{{bar:40.green/238}}] {{pos}}/{{len}} {}  {{elapsed_precise}}",
            stage.unit()
        );
        self.bar.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        self.bar.set_prefix(stage.label());
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.reset_elapsed();
    }

    fn advance(&self, _stage: Stage) {
        self.bar.inc(1);
    }

    fn finish(&self, _stage: Stage) {
        self.bar.finish_and_clear();
    }
}

fn encode(args: EncodeArgs, progress: &CliProgress) -> Result<()> {
    let options = EncodeOptions {
        symbol: SymbolSpec {
            version: args.qr_version,
            ec_level: args.ec,
            pixel_scale: args.pixel_scale,
        },
        layout: PageLayout {
            paper: args.paper,
            margin_mm: args.margin_mm,
            columns: args.columns,
            rows: args.rows,
            ..PageLayout::default()
        },
        chunk_size: args.chunk_size,
        compress: args.compress,
        no_manifest: args.no_manifest,
        title: args.title,
    };

    println!("Encoding file: {}", args.input.display());
    let result = encode_file(&args.input, &args.output, &options, progress)
        .with_context(|| format!("Failed to encode {}", args.input.display()))?;

    println!();
    println!(
        "Successfully created {} QR code(s) on {} page(s)",
        result.num_symbols, result.num_pages
    );
    println!(
        "Chunks: {} x up to {} bytes ({} bytes encoded)",
        result.num_chunks, result.chunk_size, result.payload_size
    );
    println!("SHA256: {}", result.sha256);
    if !result.has_manifest {
        println!("No manifest symbol: restores will not be named or verified");
    }
    println!("Output file: {}", result.output_path.display());
    Ok(())
}

fn decode(input: PathBuf, output: PathBuf, source: SourceArgs, progress: &CliProgress) -> Result<()> {
    println!("Decoding QR codes from: {}", input.display());
    let result = decode_file(&input, &output, &source.options(), progress)
        .with_context(|| format!("Failed to restore from {}", input.display()))?;

    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }

    println!();
    println!(
        "Successfully decoded {} chunk(s) from {} symbol(s)",
        result.num_chunks, result.num_symbols
    );
    if let Some(name) = &result.original_filename {
        println!("Original filename: {}", name);
    }
    println!(
        "Integrity: {}",
        if result.verified {
            "size and SHA256 match the manifest"
        } else {
            "not verified (no manifest symbol found)"
        }
    );
    println!(
        "Output file: {} ({} bytes)",
        result.output_path.display(),
        result.bytes_written
    );
    Ok(())
}

fn inspect(input: PathBuf, source: SourceArgs, progress: &CliProgress) -> Result<()> {
    let summary = scan_input(&input, &source.options(), progress)
        .with_context(|| format!("Failed to scan {}", input.display()))?;

    println!(
        "{} page(s), {} image(s), {} symbol(s), {} foreign QR code(s), {} warning(s)",
        summary.pages,
        summary.images,
        summary.records.len(),
        summary.foreign_symbols,
        summary.warnings.len()
    );

    let mut totals = BTreeSet::new();
    let mut indices = BTreeSet::new();
    for record in &summary.records {
        totals.insert(record.total());
        match record {
            Record::Manifest(m) => println!(
                "Manifest: {} - {} bytes - {} chunk(s) - SHA256: {}{}",
                m.filename,
                m.size,
                m.total,
                m.sha256_hex(),
                if m.flags & paperstore::chunk::FLAG_COMPRESSED != 0 {
                    " - compressed"
                } else {
                    ""
                }
            ),
            Record::Chunk(c) => {
                indices.insert(c.index);
            }
        }
    }

    match totals.len() {
        0 => println!("No paperstore symbols found"),
        1 => {
            let total = totals.iter().next().copied().unwrap_or_default();
            let missing: Vec<String> = (0..total)
                .filter(|i| !indices.contains(i))
                .map(|i| i.to_string())
                .collect();
            println!("Chunks: {}/{} present", indices.len(), total);
            if !missing.is_empty() {
                println!("Missing: {}", missing.join(", "));
            }
        }
        _ => println!("Symbols disagree on the chunk count: {:?}", totals),
    }

    for warning in &summary.warnings {
        println!("Warning: {}", warning);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = CliProgress::new(!cli.quiet && !cli.no_progress);

    match cli.command {
        Commands::Encode(args) => encode(args, &progress),
        Commands::Decode {
            input,
            output,
            source,
        } => decode(input, output, source, &progress),
        Commands::Inspect { input, source } => inspect(input, source, &progress),
    }
}
