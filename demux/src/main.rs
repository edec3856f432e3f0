mod extract;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};

use media::source::open_source;
use media::{MediaError, MediaFile};

use extract::StreamStats;

/// Media Demux Tool: extracts H.264, AC-3 and DTS elementary streams from MKV and MP4 files.
#[derive(Parser)]
#[command(name = "demux")]
struct Args {
    /// Extract audio stream?
    #[arg(long = "with-audio", default_value_t = true, action = ArgAction::Set)]
    with_audio: bool,

    /// Extract video stream?
    #[arg(long = "with-video", default_value_t = true, action = ArgAction::Set)]
    with_video: bool,

    /// Start at this time (seconds); video starts on the preceding key frame
    #[arg(long = "start")]
    start: Option<f64>,

    /// Output directory ("SRC-FOLDER" = alongside the input files)
    #[arg(long = "output-folder", default_value = "./")]
    output_folder: String,

    /// Stop on the first error instead of continuing and reporting failures at the end
    #[arg(long = "fail-fast", default_value_t = false, action = ArgAction::Set)]
    fail_fast: bool,

    /// Display version and quit
    #[arg(long = "version")]
    version: bool,

    /// Input .mkv / .mp4 files (optionally .gz compressed)
    files: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        media::version::print_cli_version_banner(
            "Media Demux Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    validate_args(args)?;
    demux_cli(args)
}

fn validate_args(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.files.is_empty() {
        return Err("Expected at least one .mkv or .mp4 file as input!".into());
    }

    if !args.with_audio && !args.with_video {
        return Err("Must enable extraction of at least one of: audio, video!".into());
    }

    if let Some(start) = args.start {
        if !start.is_finite() || start < 0.0 {
            return Err(format!("Start time must be a non-negative number of seconds, got {}", start).into());
        }
    }

    Ok(())
}

fn start_time(args: &Args) -> Option<Duration> {
    args.start.map(Duration::from_secs_f64)
}

/// A deferred failure collected when not in fail-fast mode.
#[derive(Debug)]
enum DeferredError {
    /// Error opening or parsing an input file.
    Inspect { file: String, error: String },
    /// Error extracting one stream of an input file.
    Extract {
        file: String,
        stream: &'static str,
        error: String,
    },
}

impl std::fmt::Display for DeferredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredError::Inspect { file, error } => {
                write!(f, "Failed to inspect {}: {}", file, error)
            }
            DeferredError::Extract {
                file,
                stream,
                error,
            } => {
                write!(f, "Failed to extract {} from {}: {}", stream, file, error)
            }
        }
    }
}

fn demux_cli(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut errors: Vec<DeferredError> = Vec::new();

    for path in &args.files {
        if let Err(e) = process_file(args, path, &mut errors) {
            if args.fail_fast {
                return Err(e);
            }
        }
    }

    if !errors.is_empty() {
        log::error!("");
        log::error!("OPERATION COMPLETED WITH ERRORS:");
        for e in &errors {
            log::error!("  {}", e);
        }
        return Err(format!("{} error(s) encountered during processing", errors.len()).into());
    }

    Ok(())
}

/// Log and, in deferred mode, remember an error for the final summary.
fn record_error(
    error: DeferredError,
    fail_fast: bool,
    errors: &mut Vec<DeferredError>,
) -> Box<dyn std::error::Error> {
    let msg = error.to_string();
    if fail_fast {
        log::error!("{}", msg);
    } else {
        log::warn!("{}", msg);
        errors.push(error);
    }
    msg.into()
}

/// Output path without extension: the input's name, minus `.gz` and the
/// container extension, inside the output folder.
fn output_basename(input: &str, output_folder: &str) -> PathBuf {
    let input = Path::new(input);
    let folder = output_folder.trim_end_matches(['/', '\\']);
    let folder = if folder == "SRC-FOLDER" {
        input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else if folder.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(folder)
    };

    let mut name = input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    for ext in [".gz", ".mkv", ".mp4"] {
        if name.len() > ext.len() && name.to_ascii_lowercase().ends_with(ext) {
            name.truncate(name.len() - ext.len());
        }
    }

    folder.join(name)
}

/// Append `.ext` to `basename`; names may carry dots of their own.
fn with_extension(basename: &Path, ext: &str) -> PathBuf {
    let mut name = basename.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Open, inspect and extract the requested streams of one file.
///
/// In fail-fast mode errors propagate immediately. Otherwise they are appended
/// to `errors` and processing continues with the next stream.
fn process_file(
    args: &Args,
    path: &str,
    errors: &mut Vec<DeferredError>,
) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Analysing {}", path);

    let media = media::open_media(Path::new(path)).map_err(|e| {
        record_error(
            DeferredError::Inspect {
                file: path.to_string(),
                error: e.to_string(),
            },
            args.fail_fast,
            errors,
        )
    })?;

    log::info!("\tContainer: {:?}", media.kind());
    if let Some(duration) = media.duration() {
        log::info!("\tDuration: {:.3}s", duration.as_secs_f64());
    }

    let basename = output_basename(path, &args.output_folder);
    let start = start_time(args);

    if args.with_video {
        if let Err(e) = extract_video(&media, path, &basename, start) {
            if args.fail_fast {
                return Err(e.into());
            }
            record_error(
                DeferredError::Extract {
                    file: path.to_string(),
                    stream: "video",
                    error: e.to_string(),
                },
                false,
                errors,
            );
        }
    }

    if args.with_audio {
        if let Err(e) = extract_audio(&media, path, &basename, start) {
            if args.fail_fast {
                return Err(e.into());
            }
            record_error(
                DeferredError::Extract {
                    file: path.to_string(),
                    stream: "audio",
                    error: e.to_string(),
                },
                false,
                errors,
            );
        }
    }

    Ok(())
}

fn extract_video(
    media: &MediaFile,
    input: &str,
    basename: &Path,
    start: Option<Duration>,
) -> media::Result<()> {
    let track = match media.video_track() {
        Ok(track) => track,
        Err(MediaError::NoVideoTrack) => {
            log::info!("\tNo video track, skipping video");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    log::info!(
        "\tVideo: track {} ({:?}, {}x{})",
        track.track_number,
        track.codec,
        track.decoded_size.crop.width(),
        track.decoded_size.crop.height()
    );

    let output = with_extension(basename, track.codec.info().extension);
    log::info!("Writing {}...", output.display());
    write_stream(&output, |out| {
        extract::write_video(media, open_source(Path::new(input))?, &track, start, out)
    })
}

fn extract_audio(
    media: &MediaFile,
    input: &str,
    basename: &Path,
    start: Option<Duration>,
) -> media::Result<()> {
    let track = match media.audio_track() {
        Ok(track) => track,
        Err(MediaError::NoAudioTrack) => {
            log::info!("\tNo audio track, skipping audio");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    log::info!(
        "\tAudio: track {} ({:?}, {} Hz, {} channels)",
        track.track_number,
        track.codec,
        track.sample_rate,
        track.channels
    );

    let output = with_extension(basename, track.codec.info().extension);
    log::info!("Writing {}...", output.display());
    write_stream(&output, |out| {
        extract::write_audio(media, open_source(Path::new(input))?, &track, start, out)
    })
}

/// Create `output`, run `write` against it and remove the partial file if
/// writing fails.
fn write_stream<F>(output: &Path, write: F) -> media::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> media::Result<StreamStats>,
{
    let mut out = BufWriter::new(File::create(output)?);
    match write(&mut out) {
        Ok(stats) => {
            log::info!(
                "\t{} units, {} bytes, first timestamp {}",
                stats.units,
                stats.bytes,
                stats
                    .first_timestamp
                    .map(|t| format!("{:.3}s", t.as_secs_f64()))
                    .unwrap_or_else(|| "n/a".to_string())
            );
            Ok(())
        }
        Err(e) => {
            drop(out);
            let _ = std::fs::remove_file(output);
            Err(e)
        }
    }
}
