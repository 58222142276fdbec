use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{Descriptor, FacePair, LoadLimits, PrecomputedFaceService};
use facecheck_ui::{CheckOutcome, Config, UiState, VerificationController};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facecheck", about = "Compare the two faces in an ID-and-selfie image")]
struct Cli {
    /// TOML config file (FACECHECK_* environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces, draw boxes, crop them and compare reference with probe
    Check {
        /// Image containing both faces
        image: PathBuf,
        /// Model directory
        #[arg(long)]
        models: Option<PathBuf>,
        /// Match threshold on descriptor distance
        #[arg(long)]
        threshold: Option<f32>,
        /// Detection index of the reference face (e.g. the ID document)
        #[arg(long, default_value_t = 0)]
        reference: usize,
        /// Detection index of the probe face (e.g. the selfie)
        #[arg(long, default_value_t = 1)]
        probe: usize,
        /// Directory to write overlay.png and face-<n>.png into
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare two descriptor files
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Print the detection manifest key for an image
    Digest { image: PathBuf },
    /// Show configuration and whether the face models load
    Status {
        #[arg(long)]
        models: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Check {
            image,
            models,
            threshold,
            reference,
            probe,
            out,
            json,
        } => {
            if let Some(dir) = models {
                config.model_dir = dir;
            }
            if let Some(t) = threshold {
                config.match_threshold = t;
            }
            run_check(config, &image, FacePair::new(reference, probe), out.as_deref(), json).await
        }
        Commands::Compare { a, b, threshold } => {
            let threshold = threshold.unwrap_or(config.match_threshold);
            let a = read_descriptor(&a)?;
            let b = read_descriptor(&b)?;
            let result = facecheck_core::evaluate(&a, &b, threshold)?;
            println!("Distance: {}", result.distance);
            println!("Status: {}", result.verdict);
            Ok(())
        }
        Commands::Digest { image } => {
            let loaded = facecheck_core::load_image_file(&image, &LoadLimits::default())
                .with_context(|| format!("loading {}", image.display()))?;
            println!("{}", loaded.digest());
            Ok(())
        }
        Commands::Status { models } => {
            if let Some(dir) = models {
                config.model_dir = dir;
            }
            let controller = VerificationController::new(PrecomputedFaceService::new(), config);
            let load = controller.gate().ensure_ready().await;
            let config = controller.config();
            println!(
                "{}",
                serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "model_dir": config.model_dir.display().to_string(),
                    "models_loaded": load.is_ok(),
                    "error": load.err().map(|e| e.to_string()),
                    "manifest_images": controller.gate().service().image_count(),
                    "match_threshold": config.match_threshold,
                    "detector_input_size": config.detector_input_size,
                    "score_threshold": config.score_threshold,
                })
            );
            Ok(())
        }
    }
}

async fn run_check(
    config: Config,
    image: &Path,
    pair: FacePair,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let controller = VerificationController::new(PrecomputedFaceService::new(), config);

    controller
        .select_image_file(image)
        .await
        .with_context(|| format!("loading {}", image.display()))?;
    if pair != FacePair::POSITIONAL {
        controller.select_pair(pair)?;
    }

    if !json {
        println!("Calculating...");
    }
    match controller.check().await? {
        CheckOutcome::Completed(_) => {}
        CheckOutcome::Superseded => bail!("check was superseded"),
    }

    let state = controller.state();
    if let Some(dir) = out {
        write_outputs(&state, dir)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary(&state))?);
    } else {
        println!("Faces detected: {}", state.detections.len());
        if let Some(label) = state.distance_label() {
            println!("{label}");
        }
        match (state.status_label(), &state.last_error) {
            (Some(label), _) => println!("{label}"),
            (None, Some(error)) => println!("No verdict: {error}"),
            (None, None) => println!("Need at least two faces for a verdict"),
        }
    }

    controller.shutdown().await;
    Ok(())
}

fn summary(state: &UiState) -> serde_json::Value {
    serde_json::json!({
        "image": state.source_image.as_ref().and_then(|i| i.name()),
        "digest": state.source_image.as_ref().map(|i| i.digest()),
        "faces": state.detections.len(),
        "boxes": state.detections.iter().map(|d| d.bounding_box).collect::<Vec<_>>(),
        "extracted": state.extracted_faces.iter().map(|f| f.detection_index).collect::<Vec<_>>(),
        "verification": state.verification,
        "error": state.last_error,
    })
}

fn write_outputs(state: &UiState, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    if let Some(overlay) = &state.overlay {
        let path = dir.join("overlay.png");
        overlay
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "overlay written");
    }

    for face in &state.extracted_faces {
        let path = dir.join(format!("face-{}.png", face.detection_index));
        std::fs::write(&path, &face.png).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), width = face.width, height = face.height, "face crop written");
    }

    Ok(())
}

/// Accepts `{"values": [...]}` or a bare JSON array.
fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let src = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    if let Ok(descriptor) = serde_json::from_str::<Descriptor>(&src) {
        return Ok(descriptor);
    }
    let values: Vec<f32> = serde_json::from_str(&src)
        .with_context(|| format!("{} is not a descriptor", path.display()))?;
    Ok(Descriptor::new(values))
}
