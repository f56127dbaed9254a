use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::{Context, Result};
use capture::CommandWriter;
use clap::{Parser, Subcommand, ValueEnum};
use common::traits::Compressor;
use common::{ApiFamilyId, CaptureSettings, HandleId, ThreadIdAllocator};
use compression::BlockCompressor;
use serde::Serialize;
use trace_format::{
    decode_meta_command, meta_data_type, BlockReader, DecodedCommand, MarkerType, MetaCommand,
    BLOCK_HEADER_SIZE,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("TRACE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "tracectl")]
#[command(about = "Capture trace inspection utility", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the file header and per-block counts
    Info {
        trace: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List resource initialization commands in block order
    InitCommands { trace: PathBuf },
    /// Write a small synthetic trace
    Sample {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value = "default")]
        preset: Preset,
        /// YAML or JSON capture settings; replaces the preset
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Default,
    CrashSafe,
    Archival,
    Uncompressed,
}

impl Preset {
    fn settings(self) -> CaptureSettings {
        match self {
            Preset::Default => CaptureSettings::default(),
            Preset::CrashSafe => CaptureSettings::crash_safe(),
            Preset::Archival => CaptureSettings::archival(),
            Preset::Uncompressed => CaptureSettings::uncompressed(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct TraceSummary {
    major_version: u16,
    minor_version: u16,
    compression: &'static str,
    blocks: u64,
    bytes: u64,
    block_types: BTreeMap<&'static str, u64>,
    meta_commands: BTreeMap<String, u64>,
    /// Read failure that ended the scan early, typically a truncated tail.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

type TraceFileReader = BlockReader<BufReader<File>>;

fn open_trace(path: &Path) -> Result<(TraceFileReader, Option<BlockCompressor>)> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BlockReader::open(BufReader::new(file))
        .with_context(|| format!("{} is not a capture trace", path.display()))?;
    let compressor = BlockCompressor::for_type(reader.file_header().compression_type());
    Ok((reader, compressor))
}

fn summarize(path: &Path) -> Result<TraceSummary> {
    let (mut reader, _) = open_trace(path)?;
    let header = reader.file_header().clone();
    let mut summary = TraceSummary {
        major_version: header.major_version,
        minor_version: header.minor_version,
        compression: header.compression_type().as_str(),
        ..TraceSummary::default()
    };

    loop {
        let block = match reader.next_block() {
            Ok(Some(block)) => block,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, blocks = summary.blocks, "Stopping at unreadable block");
                summary.error = Some(err.to_string());
                break;
            }
        };

        summary.blocks += 1;
        summary.bytes += (BLOCK_HEADER_SIZE + block.body.len()) as u64;
        *summary
            .block_types
            .entry(block.block_type().name())
            .or_default() += 1;
        if let Some(data_type) = meta_data_type(&block) {
            *summary
                .meta_commands
                .entry(format!("{data_type:?}"))
                .or_default() += 1;
        }
    }

    Ok(summary)
}

fn describe_init_command(decoded: &DecodedCommand) -> Option<String> {
    let detail = match &decoded.command {
        MetaCommand::BeginResourceInit {
            device_id,
            max_resource_size,
            max_copy_size,
        } => format!(
            "begin-resource-init device={device_id} max_resource_size={max_resource_size} max_copy_size={max_copy_size}"
        ),
        MetaCommand::InitBuffer {
            device_id,
            buffer_id,
            data,
        } => format!(
            "init-buffer device={device_id} buffer={buffer_id} bytes={}",
            data.len()
        ),
        MetaCommand::InitImage {
            device_id,
            image_id,
            aspect,
            layout,
            level_sizes,
            data,
        } => format!(
            "init-image device={device_id} image={image_id} aspect={aspect:#x} layout={layout} levels={} bytes={}",
            level_sizes.len(),
            data.len()
        ),
        MetaCommand::EndResourceInit { device_id } => {
            format!("end-resource-init device={device_id}")
        }
        _ => return None,
    };

    let family = decoded
        .family
        .map_or_else(|| "-".to_string(), |family| format!("{family:?}"));
    Some(format!("[{family} t{}] {detail}", decoded.thread_id.0))
}

fn init_commands(path: &Path) -> Result<Vec<String>> {
    let (mut reader, compressor) = open_trace(path)?;
    let compressor = compressor.as_ref().map(|c| c as &dyn Compressor);

    let mut lines = Vec::new();
    while let Some(block) = reader.next_block()? {
        let offset = block.offset;
        let decoded = decode_meta_command(&block, compressor)
            .with_context(|| format!("failed to decode block at offset {offset}"))?;
        if let Some(line) = decoded.as_ref().and_then(describe_init_command) {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Writes one frame holding a resource initialization bracket for a buffer
/// and a three-level image. Returns the number of bytes written.
fn write_sample(settings: &CaptureSettings) -> Result<u64> {
    let (writer, file) = CommandWriter::open_capture_file(settings)?;
    let threads = ThreadIdAllocator::new();
    let mut ctx = threads.register();
    let family = ApiFamilyId::Vulkan;
    let device = HandleId(1);

    let buffer: Vec<u8> = (0..4096u32).map(|i| (i / 64) as u8).collect();
    let level_sizes = [4096u64, 1024, 256];
    let image = vec![0x40u8; level_sizes.iter().sum::<u64>() as usize];
    let buffer_len = buffer.len() as u64;

    writer.write_state_marker(MarkerType::Begin, 0)?;
    writer.write_display_message(&mut ctx, family, "tracectl sample trace")?;
    writer.write_begin_resource_init_cmd(&mut ctx, family, device, buffer_len, buffer_len)?;
    writer.write_init_buffer_cmd(&mut ctx, family, device, HandleId(2), 0, buffer_len, &buffer)?;
    writer.write_init_image_cmd(
        &mut ctx,
        family,
        device,
        HandleId(3),
        0x1,
        7,
        level_sizes.len() as u32,
        &level_sizes,
        image.len() as u64,
        Some(&image),
    )?;
    writer.write_end_resource_init_cmd(&mut ctx, family, device)?;
    writer.write_state_marker(MarkerType::End, 0)?;
    file.close()?;

    Ok(file.bytes_written())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { trace, json } => {
            let summary = summarize(&trace)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!(
                "Trace: {} (format {}.{}, {})",
                trace.display(),
                summary.major_version,
                summary.minor_version,
                summary.compression
            );
            println!("Blocks: {} ({} bytes)", summary.blocks, summary.bytes);
            for (name, count) in &summary.block_types {
                println!("  {name:<26} {count}");
            }
            if !summary.meta_commands.is_empty() {
                println!("Meta commands:");
                for (name, count) in &summary.meta_commands {
                    println!("  {name:<26} {count}");
                }
            }
            if let Some(err) = &summary.error {
                println!("Stopped early: {err}");
            }
        }
        Commands::InitCommands { trace } => {
            for line in init_commands(&trace)? {
                println!("{line}");
            }
        }
        Commands::Sample {
            output,
            preset,
            settings,
        } => {
            let base = match settings {
                Some(path) => CaptureSettings::load(&path)?,
                None => preset.settings(),
            };
            let settings = CaptureSettings {
                capture_file: output,
                ..base
            };
            let bytes = write_sample(&settings)?;
            info!(path = %settings.capture_file.display(), bytes, "Sample trace written");
            println!("Wrote {} ({} bytes)", settings.capture_file.display(), bytes);
        }
    }

    Ok(())
}
