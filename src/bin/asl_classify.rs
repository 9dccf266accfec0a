//! asl_classify - classify ASL letter stills from disk
//!
//! Runs each image through the same pipeline the capture daemon uses
//! (rotate, optional guide-box crop, 64x64 resize, classifier, argmax) and
//! prints one prediction per image. Optionally writes annotated copies with
//! the guide box drawn, and persists the normalized frames.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use asl_capture::classify::builtin_registry;
use asl_capture::config::{ClassifierSettings, StorageSettings};
use asl_capture::ingest::{FileConfig, FileSource, FrameSource};
use asl_capture::overlay::{draw_outline, GuideBox, GUIDE_GREEN, SQUARE_BOX_FRACTION};
use asl_capture::preprocess::{rotate, CropMode, FrameNormalizer};
use asl_capture::sink::{
    select_store, ImageEncoding, LogDisplay, StorageBackend, StorageCapabilities,
};
use asl_capture::ui::Ui;
use asl_capture::{FrameOutcome, Pipeline, RawFrame, SessionPolicy};

#[derive(Parser, Debug)]
#[command(
    name = "asl_classify",
    about = "Classify ASL letter images (JPEG/PNG files or directories)"
)]
struct Args {
    /// Image files or directories of images
    #[arg(required = true, value_name = "PATH")]
    inputs: Vec<PathBuf>,

    /// Sensor rotation to apply before resizing (degrees, clockwise)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    rotation: i32,

    /// Crop before resizing (none|center_square|quarter)
    #[arg(long, default_value = "none")]
    crop: String,

    /// Classifier backend (stub|tract)
    #[arg(long, default_value = "stub", env = "ASL_CLASSIFIER")]
    classifier: String,

    /// ONNX model for the tract backend
    #[arg(long, value_name = "PATH", env = "ASL_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Write rotated copies with the guide box drawn into this directory
    #[arg(long, value_name = "DIR")]
    annotate: Option<PathBuf>,

    /// Guide box outline thickness in pixels
    #[arg(long, default_value_t = 4)]
    thickness: u32,

    /// Persist normalized frames under this pictures directory
    #[arg(long, value_name = "DIR")]
    save: Option<PathBuf>,

    /// Album (folder) name for persisted frames
    #[arg(long, default_value = "ASL_Images")]
    album: String,

    /// Persist through the media collection instead of plain files
    #[arg(long)]
    collection: bool,

    /// Persist as JPEG instead of PNG
    #[arg(long)]
    jpeg: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let crop = CropMode::parse(&args.crop)
        .ok_or_else(|| anyhow!("--crop must be one of none, center_square, quarter"))?;

    let mut pipeline = {
        let _stage = ui.stage("Load classifier");
        let settings = ClassifierSettings {
            backend: args.classifier.to_lowercase(),
            model_path: args.model.clone(),
            session: SessionPolicy::Pooled,
        };
        let session = builtin_registry(&settings)?.default_session(settings.session)?;
        Pipeline::new(FrameNormalizer::new(crop, true), session, Box::new(LogDisplay))
    };

    if let Some(root) = &args.save {
        let _stage = ui.stage("Open capture storage");
        let settings = StorageSettings {
            enabled: true,
            backend: if args.collection {
                StorageBackend::Collection
            } else {
                StorageBackend::Directory
            },
            root: root.clone(),
            album: args.album.clone(),
            encoding: if args.jpeg {
                ImageEncoding::Jpeg
            } else {
                ImageEncoding::Png
            },
            scoped_storage: args.collection,
        };
        let caps = StorageCapabilities {
            scoped_storage: args.collection,
        };
        pipeline = pipeline.with_store(select_store(&settings, &caps)?);
    }

    if let Some(dir) = &args.annotate {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create annotation directory {}", dir.display()))?;
    }

    let mut failed = 0usize;
    for input in &args.inputs {
        let mut source = FileSource::new(FileConfig {
            path: input.display().to_string(),
            target_fps: 0,
            rotation_degrees: args.rotation,
            loop_playback: false,
        })?;
        source.connect()?;
        let files = source.files().to_vec();
        let progress = ui.batch(&format!("Classify {}", input.display()), files.len() as u64);

        for path in &files {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    failed += 1;
                    progress.println(&format!("{}: {:#}", path.display(), e));
                    progress.advance("unreadable");
                    continue;
                }
            };

            if let Some(dir) = &args.annotate {
                if let Err(e) = annotate(&frame, crop, args.thickness, path, dir) {
                    progress.println(&format!("{}: annotation failed: {:#}", path.display(), e));
                }
            }

            let outcome = pipeline.process(frame);
            let status = describe(&outcome);
            if !outcome.failures().is_empty() {
                failed += 1;
            }
            progress.println(&format!("{}: {}", path.display(), status));
            progress.advance(&status);
        }
    }

    let stats = pipeline.stats().snapshot();
    println!(
        "classified {} image(s), saved {}, failed {}",
        stats.classified, stats.saved, failed
    );
    if failed > 0 && stats.classified == 0 {
        return Err(anyhow!("no image could be classified"));
    }
    Ok(())
}

fn describe(outcome: &FrameOutcome) -> String {
    match outcome {
        FrameOutcome::Dropped(kind) => format!("dropped ({})", kind.code()),
        FrameOutcome::Processed {
            prediction,
            stored,
            failures,
        } => {
            let mut text = match prediction {
                Some(prediction) => prediction.to_string(),
                None => "no prediction".to_string(),
            };
            if let Some(stored) = stored {
                text.push_str(&format!(" -> {}", stored.location));
            }
            for kind in failures {
                text.push_str(&format!(" [{}]", kind.code()));
            }
            text
        }
    }
}

fn annotate(frame: &RawFrame, crop: CropMode, thickness: u32, source: &Path, dir: &Path) -> Result<()> {
    let decoded = image::load_from_memory(frame.bytes())?.to_rgb8();
    let mut rotated = rotate(decoded, frame.rotation_degrees);
    let (width, height) = rotated.dimensions();
    let guide = crop
        .guide_box(width, height)
        .unwrap_or_else(|| GuideBox::centered_square(width, height, SQUARE_BOX_FRACTION));
    draw_outline(&mut rotated, &guide, GUIDE_GREEN, thickness);

    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("frame");
    let out = dir.join(format!("{}_guide.png", stem));
    rotated
        .save(&out)
        .with_context(|| format!("write {}", out.display()))?;
    Ok(())
}
