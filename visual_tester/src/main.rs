use anyhow::{Context, Result, bail};
use blob_vision::core_modules::blob_detector::BlobDetector;
use blob_vision::core_modules::blob_stats::BlobStats;
use blob_vision::core_modules::overlay::{DEFAULT_BOX_COLOR, draw_frame_boxes};
use blob_vision::core_modules::utils::yuv_file::{self, YuvFileReader};
use blob_vision::core_modules::yuv_frame::YuvFrame;
use blob_vision::pipeline::{ColorThresholds, PipelineConfig};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Runs the color blob detector over a still image or a `.yuv` recording and
/// writes an annotated copy.
#[derive(Debug, Parser)]
#[command(name = "visual_tester", version)]
struct Args {
    /// A `.yuv` file or any image format the `image` crate can decode.
    #[arg(required_unless_present = "pattern")]
    input: Option<PathBuf>,

    /// Detect over a generated U/V calibration chart with this luma instead of
    /// reading an input.
    #[arg(long, value_name = "LUMA", conflicts_with = "input")]
    pattern: Option<u8>,

    /// Size of the calibration chart as `COLSxROWS`.
    #[arg(long, default_value = "640x480", value_parser = parse_size)]
    pattern_size: (usize, usize),

    /// Where to write the annotated frame(s): `.yuv` keeps the raw format,
    /// anything else is written as PNG.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pipeline configuration in TOML.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Color window as `y_low,u_low,u_high,v_low,v_high`.
    #[arg(short, long, value_parser = parse_thresholds)]
    thresholds: Option<ColorThresholds>,

    /// Smallest blob, in pixels, that gets a bounding box.
    #[arg(long)]
    min_pixels: Option<u32>,

    /// Double the luma of detected pixels and halve everything else.
    #[arg(long)]
    highlight: bool,

    /// Process every frame of a `.yuv` input instead of only the first.
    #[arg(long)]
    all_frames: bool,

    /// Print one JSON object per frame instead of the text listing.
    #[arg(long)]
    json: bool,
}

fn parse_thresholds(value: &str) -> Result<ColorThresholds, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("threshold values must be 0-255: {err}"))?;
    match parts[..] {
        [y_low, u_low, u_high, v_low, v_high] => {
            Ok(ColorThresholds::new(y_low, u_low, u_high, v_low, v_high))
        }
        _ => Err(format!("expected 5 comma-separated values, got {}", parts.len())),
    }
}

fn parse_size(value: &str) -> Result<(usize, usize), String> {
    let (cols, rows) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLSxROWS, got {value:?}"))?;
    let parse = |part: &str| part.trim().parse::<usize>().map_err(|err| format!("bad dimension {part:?}: {err}"));
    Ok((parse(cols)?, parse(rows)?))
}

fn main() -> Result<()> {
    // --- 1. Logging & Argument Parsing ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    // --- 2. Configuration ---
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(thresholds) = args.thresholds {
        config.thresholds = thresholds;
    }
    if let Some(min_pixels) = args.min_pixels {
        config.min_pixels_per_blob = min_pixels;
    }
    config.highlight_detected_pixels |= args.highlight;
    tracing::info!(thresholds = ?config.thresholds, min_pixels = config.min_pixels_per_blob, "configured");

    // --- 3. Input ---
    let frames = match (args.pattern, &args.input) {
        (Some(luma), _) => {
            let (cols, rows) = args.pattern_size;
            vec![YuvFrame::color_space_pattern(cols, rows, luma).context("generating calibration chart")?]
        }
        (None, Some(input)) => load_frames(input, args.all_frames)?,
        (None, None) => bail!("an input file or --pattern is required"),
    };
    let mut detector = BlobDetector::new(config.max_runs, config.max_blobs)?;

    // --- 4. Detection & Annotation ---
    let mut annotated = Vec::with_capacity(frames.len());
    for (frame_no, mut frame) in frames.into_iter().enumerate() {
        let started = Instant::now();
        detector.detect_frame(&config.thresholds, config.highlight_detected_pixels, &mut frame)?;
        let elapsed = started.elapsed();

        let forest = detector.forest_mut();
        if forest.overflow_count() > 0 {
            tracing::warn!(frame_no, overflow = forest.overflow_count(), "blob capacity exhausted");
        }
        let unsorted: Vec<BlobStats> = forest.blobs().copied().collect();
        forest.sort_by_size();
        let sorted: Vec<BlobStats> = forest.blobs().copied().collect();

        if args.json {
            let line = serde_json::json!({
                "frame": frame_no,
                "elapsed_micros": elapsed.as_micros() as u64,
                "total_pixels": forest.total_pixel_count(),
                "blobs": sorted,
            });
            println!("{line}");
        } else {
            println!("frame {frame_no}: {} blobs", sorted.len());
            print_blobs("before sorting", &unsorted);
            print_blobs("after sorting", &sorted);
            println!("total pixels: {}", forest.total_pixel_count());
            println!("elapsed: {elapsed:?}");
        }

        draw_frame_boxes(detector.forest(), config.min_pixels_per_blob, DEFAULT_BOX_COLOR, &mut frame)?;
        annotated.push(frame);
    }

    // --- 5. Output ---
    if let Some(output) = &args.output {
        write_frames(output, &annotated)?;
        tracing::info!(path = %output.display(), frames = annotated.len(), "annotated output written");
    }
    Ok(())
}

fn load_frames(path: &Path, all_frames: bool) -> Result<Vec<YuvFrame>> {
    if !has_extension(path, "yuv") {
        let frame = yuv_file::load_image(path).with_context(|| format!("decoding {}", path.display()))?;
        return Ok(vec![frame]);
    }
    let reader = YuvFileReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let limit = if all_frames { usize::MAX } else { 1 };
    let frames = reader
        .take(limit)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", path.display()))?;
    if frames.is_empty() {
        bail!("{} contains no frames", path.display());
    }
    Ok(frames)
}

fn write_frames(path: &Path, frames: &[YuvFrame]) -> Result<()> {
    if has_extension(path, "yuv") {
        let file = std::fs::File::create(path)?;
        yuv_file::write_yuv(std::io::BufWriter::new(file), frames)?;
        return Ok(());
    }
    match frames {
        [frame] => yuv_file::save_png(frame, path)?,
        _ => {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
            for (frame_no, frame) in frames.iter().enumerate() {
                let numbered = path.with_file_name(format!("{stem}_{frame_no:04}.png"));
                yuv_file::save_png(frame, &numbered)?;
            }
        }
    }
    Ok(())
}

fn print_blobs(label: &str, blobs: &[BlobStats]) {
    println!("  {label}:");
    for (index, blob) in blobs.iter().enumerate() {
        let (cx, cy) = blob.centroid().unwrap_or_default();
        println!(
            "    {index:3}: x {:4}..{:4} y {:4}..{:4} sum ({}, {}) center ({cx:4}, {cy:4}) pixels {}",
            blob.min_x, blob.max_x, blob.min_y, blob.max_y, blob.sum_x, blob.sum_y, blob.count
        );
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_parse_from_five_values() {
        let parsed = parse_thresholds("100, 90,130,140,200").expect("valid");
        assert_eq!(parsed, ColorThresholds::new(100, 90, 130, 140, 200));
        assert!(parse_thresholds("1,2,3").is_err());
        assert!(parse_thresholds("1,2,3,4,256").is_err());
    }

    #[test]
    fn sizes_parse_as_cols_by_rows() {
        assert_eq!(parse_size("640x480"), Ok((640, 480)));
        assert_eq!(parse_size("32X16"), Ok((32, 16)));
        assert!(parse_size("640").is_err());
        assert!(parse_size("ax4").is_err());
    }

    #[test]
    fn pattern_replaces_the_input() {
        let args = Args::try_parse_from(["visual_tester", "--pattern", "180", "--pattern-size", "32x16"])
            .expect("input is optional with --pattern");
        assert_eq!(args.pattern, Some(180));
        assert_eq!(args.pattern_size, (32, 16));
        assert!(Args::try_parse_from(["visual_tester"]).is_err());
    }

    #[test]
    fn extensions_match_case_insensitively() {
        assert!(has_extension(Path::new("clip.YUV"), "yuv"));
        assert!(!has_extension(Path::new("clip.png"), "yuv"));
        assert!(!has_extension(Path::new("clip"), "yuv"));
    }
}
