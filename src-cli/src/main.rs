//! StaffSplit command line: sheet-music image in, MusicXML out.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use staffsplit_core::{export_diagnostics, CancelToken, ConversionResultRef, Pipeline};
use staffsplit_infra_omr_process::ProcessOmr;
use staffsplit_infra_storage_fs::FsSettingsStore;
use staffsplit_ports::settings::{PipelineSettings, SettingsPort};
use staffsplit_ports::types::EngineKind;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "staffsplit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (default: settings.json in the user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a sheet-music image to MusicXML
    Convert {
        /// PNG or JPEG page image
        input: PathBuf,

        /// Output file or directory (default: next to the input)
        #[arg(short, long)]
        output: Option<String>,

        /// OMR engine to run on each staff strip
        #[arg(long, value_parser = ["audiveris", "oemer"])]
        engine: Option<String>,

        /// Engine executable, overriding the configured one
        #[arg(long)]
        engine_path: Option<String>,

        /// Concurrent engine invocations
        #[arg(long)]
        workers: Option<usize>,

        /// Pad or trim measures whose note durations do not fill the time signature
        #[arg(long)]
        repair_durations: bool,

        /// Write a diagnostics bundle to this directory
        #[arg(long)]
        diagnostics: Option<PathBuf>,
    },

    /// Write the detected staff strips as PNG files
    Segment {
        /// PNG or JPEG page image
        input: PathBuf,

        /// Directory for strip-NN.png files
        #[arg(short, long)]
        out_dir: PathBuf,
    },

    /// Print the effective settings as JSON
    Settings {
        /// Save the effective settings back to the settings file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            engine,
            engine_path,
            workers,
            repair_durations,
            diagnostics,
        } => {
            let overrides = Overrides {
                engine,
                engine_path,
                workers,
                repair_durations,
            };
            run_convert(
                cli.settings.as_deref(),
                &input,
                output.as_deref(),
                overrides,
                diagnostics.as_deref(),
            )
        }
        Commands::Segment { input, out_dir } => {
            run_segment(cli.settings.as_deref(), &input, &out_dir)
        }
        Commands::Settings { save } => run_settings(cli.settings.as_deref(), save),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

struct Overrides {
    engine: Option<String>,
    engine_path: Option<String>,
    workers: Option<usize>,
    repair_durations: bool,
}

impl Overrides {
    fn apply(self, settings: &mut PipelineSettings) {
        match self.engine.as_deref() {
            Some("audiveris") => settings.engine = EngineKind::Audiveris,
            Some("oemer") => settings.engine = EngineKind::Oemer,
            _ => {}
        }
        if self.engine_path.is_some() {
            settings.engine_path = self.engine_path;
        }
        if let Some(workers) = self.workers {
            settings.worker_limit = workers.max(1);
        }
        if self.repair_durations {
            settings.repair_durations = true;
        }
    }
}

fn settings_store(path: Option<&Path>) -> FsSettingsStore {
    match path {
        Some(path) => FsSettingsStore::from_file(path.to_path_buf()),
        None => FsSettingsStore::default(),
    }
}

fn load_settings(path: Option<&Path>) -> Result<PipelineSettings> {
    let store = settings_store(path);
    store
        .load_settings()
        .with_context(|| format!("loading {}", store.settings_path().display()))
}

fn build_pipeline(settings: PipelineSettings) -> Pipeline {
    let engine = ProcessOmr::new(settings.engine, settings.engine_path.clone());
    Pipeline::new(Arc::new(engine), settings)
}

fn run_convert(
    settings_path: Option<&Path>,
    input: &Path,
    output: Option<&str>,
    overrides: Overrides,
    diagnostics: Option<&Path>,
) -> Result<()> {
    let mut settings = load_settings(settings_path)?;
    overrides.apply(&mut settings);
    if diagnostics.is_some() {
        settings.keep_diagnostics = true;
    }

    let image = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let pipeline = build_pipeline(settings.clone());
    let result = pipeline.convert_with_progress(&image, &CancelToken::new(), |stage| {
        info!(%stage, "stage");
    });

    if let Some(dir) = diagnostics {
        let snapshot = match &result {
            Ok(outcome) => ConversionResultRef::Done(&outcome.report),
            Err(err) => ConversionResultRef::Failed(err),
        };
        export_diagnostics(dir, &settings, Some(snapshot))
            .with_context(|| format!("writing diagnostics to {}", dir.display()))?;
        info!(dir = %dir.display(), "diagnostics written");
    }

    let outcome = result?;
    let out_path = output::resolve_output_path(input, output)
        .with_context(|| format!("preparing output for {}", input.display()))?;
    fs::write(&out_path, &outcome.musicxml)
        .with_context(|| format!("writing {}", out_path.display()))?;

    let report = &outcome.report;
    info!(
        path = %out_path.display(),
        strips = report.strips.len(),
        measures = report.measure_count,
        dropped = ?report.dropped_indices(),
        quality = report.quality,
        "MusicXML written"
    );
    Ok(())
}

fn run_segment(settings_path: Option<&Path>, input: &Path, out_dir: &Path) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let image = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let strips = build_pipeline(settings).strips(&image)?;

    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    for strip in &strips {
        let path = out_dir.join(format!("strip-{:02}.png", strip.index));
        let png = strip
            .to_png()
            .with_context(|| format!("encoding strip {}", strip.index))?;
        fs::write(&path, png).with_context(|| format!("writing {}", path.display()))?;
        info!(
            path = %path.display(),
            top = strip.top,
            height = strip.height(),
            "strip written"
        );
    }
    Ok(())
}

fn run_settings(settings_path: Option<&Path>, save: bool) -> Result<()> {
    let store = settings_store(settings_path);
    let settings = store
        .load_settings()
        .with_context(|| format!("loading {}", store.settings_path().display()))?;
    if save {
        store
            .save_settings(&settings)
            .with_context(|| format!("saving {}", store.settings_path().display()))?;
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
