//! pupilscene CLI — batch scene-geometry estimation from pupil ellipse files.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use pupilscene::{
    estimate_scene_geometry, project_pupil, EyePose, FitLabel, PupilFitSeries, SceneGeometry,
    SceneSearchConfig,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pupilscene")]
#[command(about = "Estimate eye/camera scene geometry from pupil boundary ellipses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scene parameter search over one or more observation files.
    Estimate(EstimateArgs),

    /// Forward-project a single eye pose and print the resulting ellipse.
    Forward(ForwardArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliFitLabel {
    Initial,
    SceneConstrained,
    RadiusSmoothed,
}

impl From<CliFitLabel> for FitLabel {
    fn from(label: CliFitLabel) -> Self {
        match label {
            CliFitLabel::Initial => FitLabel::Initial,
            CliFitLabel::SceneConstrained => FitLabel::SceneConstrained,
            CliFitLabel::RadiusSmoothed => FitLabel::RadiusSmoothed,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct EstimateArgs {
    /// Observation files (JSON `PupilFitSeries`), concatenated in order.
    #[arg(long, required = true, num_args = 1..)]
    observations: Vec<PathBuf>,

    /// Path to write the estimated scene geometry (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Which upstream fitting pass to use.
    #[arg(long, value_enum, default_value = "initial")]
    fit_label: CliFitLabel,

    /// Search configuration file (JSON `SceneSearchConfig`); defaults apply
    /// when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable the ray-traced refinement stage.
    #[arg(long)]
    ray_trace: bool,

    /// Multi-start runs for the no-ray-trace stage.
    #[arg(long)]
    runs: Option<usize>,

    /// Spatial bins per image axis for ellipse selection.
    #[arg(long)]
    bins: Option<usize>,

    /// Base random seed.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct ForwardArgs {
    /// Azimuth in degrees.
    #[arg(long, default_value = "0.0")]
    azimuth: f64,

    /// Elevation in degrees.
    #[arg(long, default_value = "0.0")]
    elevation: f64,

    /// Pupil radius in millimeters.
    #[arg(long, default_value = "2.0")]
    radius: f64,

    /// Scene geometry file (JSON); defaults apply when omitted.
    #[arg(long)]
    scene: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Estimate(args) => run_estimate(args),
        Commands::Forward(args) => run_forward(args),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run_estimate(args: EstimateArgs) -> CliResult<()> {
    let mut sources = Vec::with_capacity(args.observations.len());
    for path in &args.observations {
        tracing::info!("Loading observations: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let series: PupilFitSeries = serde_json::from_str(&text)?;
        sources.push(series);
    }

    let mut config: SceneSearchConfig = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SceneSearchConfig::default(),
    };
    if args.ray_trace {
        config.ray_trace = true;
    }
    if let Some(runs) = args.runs {
        config.n_searches[0] = runs;
    }
    if let Some(bins) = args.bins {
        config.n_bins = bins;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let geometry = estimate_scene_geometry(&sources, args.fit_label.into(), &config)?;

    if let Some(meta) = &geometry.meta {
        tracing::info!(
            "accepted geometry: translation [{:.3}, {:.3}, {:.3}], fval {:.6}",
            geometry.camera.translation[0],
            geometry.camera.translation[1],
            geometry.camera.translation[2],
            meta.fval
        );
    }

    let json = serde_json::to_string_pretty(&geometry)?;
    std::fs::write(&args.out, json)?;
    tracing::info!("Wrote scene geometry: {}", args.out.display());
    Ok(())
}

fn run_forward(args: ForwardArgs) -> CliResult<()> {
    let scene: SceneGeometry = match &args.scene {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SceneGeometry::default(),
    };

    let pose = EyePose::new(args.azimuth, args.elevation, args.radius);
    let ellipse = project_pupil(&pose, &scene, None);
    println!("{}", serde_json::to_string_pretty(&ellipse)?);
    Ok(())
}
