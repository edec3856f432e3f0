use std::path::Path;
use std::time::Duration;

use clap::Parser;
use media::detect::ContainerKind;
use media::mkv::MkvFile;
use media::mkv::cluster::ClusterCache;
use media::mp4::Mp4File;
use media::track::{AudioTrack, VideoTrack};
use media::MediaFile;

#[derive(Parser)]
#[command(name = "media-info", about = "Parse and display MKV / MP4 file structure")]
struct Args {
    /// Input media file
    #[arg(short = 'f', long = "file")]
    file: Option<String>,

    /// Input media file (positional)
    #[arg(conflicts_with = "file", required_unless_present_any = ["file", "schema", "version"])]
    input: Option<String>,

    /// List every block (MKV) or sample (MP4)
    #[arg(long)]
    samples: bool,

    /// Filter the sample list by track number
    #[arg(short = 't', long = "track")]
    track_filter: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Print JSON schema for the output format and exit
    #[arg(long)]
    schema: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,
}

/// Parsed container structure, as printed by `--json`.
#[derive(serde::Serialize, schemars::JsonSchema)]
#[serde(tag = "container", content = "file")]
enum Structure {
    Mkv(MkvFile),
    Mp4(Mp4File),
}

#[derive(serde::Serialize, schemars::JsonSchema)]
struct MediaInfo {
    kind: ContainerKind,
    duration_ms: Option<u64>,
    /// The track a player would pick, when one is usable.
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    structure: Structure,
}

impl MediaInfo {
    fn new(media: &MediaFile) -> Self {
        let video = media
            .video_track()
            .inspect_err(|e| log::warn!("No usable video track: {}", e))
            .ok();
        let audio = media
            .audio_track()
            .inspect_err(|e| log::warn!("No usable audio track: {}", e))
            .ok();
        let structure = match media {
            MediaFile::Mkv(f) => Structure::Mkv(MkvFile::clone(f)),
            MediaFile::Mp4(f) => Structure::Mp4(Mp4File::clone(f)),
        };
        Self {
            kind: media.kind(),
            duration_ms: media.duration().map(|d| d.as_millis() as u64),
            video,
            audio,
            structure,
        }
    }
}

fn main() {
    // Reset SIGPIPE to default so piped output (e.g. head/tail) exits cleanly
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

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
            "Media Info Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    if args.schema {
        let schema = schemars::schema_for!(MediaInfo);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let file = args
        .file
        .as_ref()
        .or(args.input.as_ref())
        .ok_or("Expected a media file as input!")?;
    let path = Path::new(file);
    let media = media::open_media(path)?;
    let info = MediaInfo::new(&media);

    if args.json {
        println!("{}", serde_json::to_string(&info)?);
        return Ok(());
    }

    print_summary(&info);
    match &info.structure {
        Structure::Mkv(mkv) => {
            print_mkv(mkv);
            if args.samples {
                print_mkv_blocks(path, mkv, args.track_filter)?;
            }
        }
        Structure::Mp4(mp4) => {
            print_mp4(mp4);
            if args.samples {
                print_mp4_samples(mp4, args.track_filter);
            }
        }
    }

    Ok(())
}

fn format_duration(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}

fn print_summary(info: &MediaInfo) {
    println!("Container: {:?}", info.kind);
    match info.duration_ms {
        Some(ms) => println!("Duration:  {}", format_duration(Duration::from_millis(ms))),
        None => println!("Duration:  unknown"),
    }
    if let Some(v) = &info.video {
        let size = v.decoded_size;
        println!(
            "Video:     track {} {:?}, {}x{} visible of {}x{}, {:?}, {}-bit",
            v.track_number,
            v.codec,
            size.crop.width(),
            size.crop.height(),
            size.size.width,
            size.size.height,
            size.chroma_format,
            v.bit_depth_luma,
        );
    }
    if let Some(a) = &info.audio {
        println!(
            "Audio:     track {} {:?}, {} Hz, {} channels",
            a.track_number, a.codec, a.sample_rate, a.channels
        );
    }
    println!();
}

fn print_mkv(mkv: &MkvFile) {
    println!("Doc type:        {}", mkv.doc_type);
    println!("Timestamp scale: {} ns", mkv.info.timestamp_scale);
    if let Some(app) = &mkv.info.writing_app {
        println!("Writing app:     {}", app);
    }
    println!();

    println!("{:>4} {:>6} {:<20} {}", "NUM", "TYPE", "CODEC", "DETAILS");
    for track in &mkv.tracks {
        let details = match (&track.video, &track.audio) {
            (Some(v), _) => format!("{}x{}", v.pixel_width, v.pixel_height),
            (_, Some(a)) => format!("{} Hz, {} ch", a.sampling_frequency, a.channels),
            _ => String::new(),
        };
        println!(
            "{:>4} {:>6} {:<20} {}",
            track.number,
            format!("{:?}", track.track_type),
            track.codec_id,
            details
        );
    }
    println!();

    println!("Clusters: {}", mkv.clusters.len());
    println!("{:>6} {:>16} {:>12} {:>10}", "IDX", "POSITION", "TIMESTAMP", "TIME");
    for (i, cluster) in mkv.clusters.iter().enumerate() {
        println!(
            "{:>6} {:>16} {:>12} {:>10}",
            i,
            cluster.position,
            cluster.timestamp,
            format_duration(mkv.ticks_to_duration(cluster.timestamp)),
        );
    }
    println!();

    println!("Cues: {}", mkv.cues.len());
    for (track, points) in mkv.seek_index.tracks() {
        println!("Seek index, track {}: {} points", track, points.len());
        for point in points {
            println!(
                "{:>12} -> cluster {}",
                format_duration(mkv.ticks_to_duration(point.time)),
                point.cluster
            );
        }
    }
}

fn print_mkv_blocks(
    path: &Path,
    mkv: &MkvFile,
    track_filter: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut source = media::source::open_source(path)?;
    let mut cache = ClusterCache::new();

    println!();
    println!("{:>5} {:>3} {:>16} {:>8} {:>12}", "TID", "KF", "OFFSET", "SIZE", "TIME");
    for index in 0..mkv.clusters.len() {
        println!("----------- CLUSTER {} -----------", index);
        let cluster = cache.get(&mut source, mkv, index)?;
        for blob in &cluster.blobs {
            if track_filter.is_some_and(|t| t != blob.track) {
                continue;
            }
            let ticks = (cluster.timestamp as i64 + blob.timestamp as i64).max(0) as u64;
            println!(
                "{:>5} {:>3} {:>16} {:>8} {:>12}",
                blob.track,
                if blob.keyframe { 1 } else { 0 },
                blob.position,
                blob.length,
                format_duration(mkv.ticks_to_duration(ticks)),
            );
        }
    }
    Ok(())
}

fn print_mp4(mp4: &Mp4File) {
    println!(
        "Brands: {} (compatible: {})",
        mp4.file_type.major_brand,
        mp4.file_type.compatible_brands.join(", ")
    );
    println!("Movie timescale: {}", mp4.timescale);
    println!();

    println!(
        "{:>4} {:>8} {:>6} {:>10} {:>8} {}",
        "ID", "HANDLER", "ENTRY", "TIMESCALE", "SAMPLES", "DETAILS"
    );
    for track in &mp4.tracks {
        let details = match (track.sample_rate, track.channels) {
            (Some(rate), Some(ch)) => format!("{} Hz, {} ch", rate, ch),
            _ => format!("{}x{}", track.width, track.height),
        };
        println!(
            "{:>4} {:>8} {:>6} {:>10} {:>8} {}",
            track.track_id,
            format!("{:?}", track.handler),
            track.sample_entry.as_deref().unwrap_or("-"),
            track.timescale,
            track.sample_count,
            details,
        );
    }
}

fn print_mp4_samples(mp4: &Mp4File, track_filter: Option<u64>) {
    println!();
    println!(
        "{:>5} {:>7} {:>3} {:>16} {:>8} {:>12} {:>8}",
        "TID", "IDX", "KF", "OFFSET", "SIZE", "DTS", "CTS"
    );
    for track in &mp4.tracks {
        if track_filter.is_some_and(|t| t != track.track_id as u64) {
            continue;
        }
        for sample in &track.samples.samples {
            println!(
                "{:>5} {:>7} {:>3} {:>16} {:>8} {:>12} {:>8}",
                track.track_id,
                sample.index,
                if sample.keyframe { 1 } else { 0 },
                sample.offset,
                sample.size,
                sample.dts,
                sample.cts_offset,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_input() {
        let args = Args::try_parse_from(["media-info", "movie.mkv", "--json"]).unwrap();
        assert_eq!(args.input.as_deref(), Some("movie.mkv"));
        assert!(args.json);
    }

    #[test]
    fn test_input_required_unless_schema() {
        assert!(Args::try_parse_from(["media-info"]).is_err());
        assert!(Args::try_parse_from(["media-info", "--schema"]).is_ok());
        assert!(Args::try_parse_from(["media-info", "-f", "a.mp4", "b.mp4"]).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration(Duration::ZERO), "0.000s");
    }

    #[test]
    fn test_schema_names_both_containers() {
        let schema = serde_json::to_string(&schemars::schema_for!(MediaInfo)).unwrap();
        assert!(schema.contains("MkvFile"));
        assert!(schema.contains("Mp4File"));
    }
}
