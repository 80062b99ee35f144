use crate::pipeline::{ConversionReport, PipelineError};
use serde::Serialize;
use staffsplit_ports::settings::{PipelineSettings, StorageError};
use staffsplit_ports::types::StripIndex;
use std::fs;
use std::path::Path;

#[derive(Serialize)]
struct AppVersion {
    name: String,
    version: String,
}

#[derive(Serialize)]
struct PlatformInfo {
    os: String,
    arch: String,
}

#[derive(Serialize)]
struct FailureSnapshot {
    stage: String,
    failed_strips: Vec<StripIndex>,
    message: String,
}

/// What a conversion ended with, for the diagnostics bundle.
pub enum ConversionResultRef<'a> {
    Done(&'a ConversionReport),
    Failed(&'a PipelineError),
}

pub fn export_diagnostics(
    dir: &Path,
    settings: &PipelineSettings,
    result: Option<ConversionResultRef<'_>>,
) -> Result<(), StorageError> {
    fs::create_dir_all(dir).map_err(|e| StorageError::Io(e.to_string()))?;

    let app_version = AppVersion {
        name: "StaffSplit".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let platform = PlatformInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    };

    write_json(&dir.join("app_version.json"), &app_version)?;
    write_json(&dir.join("platform.json"), &platform)?;
    write_json(&dir.join("settings.json"), settings)?;

    match result {
        Some(ConversionResultRef::Done(report)) => {
            write_json(&dir.join("report.json"), report)?;
        }
        Some(ConversionResultRef::Failed(err)) => {
            write_json(
                &dir.join("failure.json"),
                &FailureSnapshot {
                    stage: err.stage.to_string(),
                    failed_strips: err.failed_indices(),
                    message: err.to_string(),
                },
            )?;
        }
        None => {}
    }

    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serde(e.to_string()))?;
    fs::write(path, data).map_err(|e| StorageError::Io(e.to_string()))
}
