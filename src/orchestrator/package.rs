//! Deployment package export.
//!
//! Renders a stored artifact into a self-contained directory in one of four
//! shapes: a source module, a runnable service scaffold, a bare spec
//! bundle, or a container build context.

use crate::error::{StudioError, StudioResult};
use crate::logging::log_info;
use crate::store::HistoryStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Supported export shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageFormat {
    Module,
    Service,
    Spec,
    Image,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Module => "module",
            PackageFormat::Service => "service",
            PackageFormat::Spec => "spec",
            PackageFormat::Image => "image",
        }
    }
}

/// Render a stored artifact into `out_dir/<artifact_id>_<format>/`.
pub fn export_deployment_package(
    store: &HistoryStore,
    artifact_id: &str,
    out_dir: &Path,
    format: PackageFormat,
) -> StudioResult<PathBuf> {
    let program = store.load_artifact(artifact_id)?;
    let dir = out_dir.join(format!("{artifact_id}_{}", format.as_str()));
    fs::create_dir_all(&dir)
        .map_err(|e| StudioError::store("failed to create package directory", Some(e)))?;

    let manifest = serde_json::json!({
        "artifact_id": artifact_id,
        "format": format.as_str(),
        "target_lm": program.target_lm,
        "optimizer": program.optimizer,
        "metric": { "name": program.metric_name, "value": program.metric_value },
    });
    write(&dir.join("manifest.json"), &serde_json::to_vec_pretty(&manifest).unwrap_or_default())?;

    match format {
        PackageFormat::Spec => {
            write_json(&dir.join("program_spec.json"), &program.spec)?;
            write_json(&dir.join("signatures.json"), &program.signatures)?;
        }
        PackageFormat::Module => {
            write(&dir.join("program.rs"), program.program_code.as_bytes())?;
            write_json(&dir.join("signatures.json"), &program.signatures)?;
            let demos_dir = dir.join("demos");
            fs::create_dir_all(&demos_dir)
                .map_err(|e| StudioError::store("failed to create demos directory", Some(e)))?;
            for (i, demo) in program.demonstrations.iter().enumerate() {
                write_json(&demos_dir.join(format!("demo_{i:03}.json")), demo)?;
            }
        }
        PackageFormat::Service => {
            write(&dir.join("program.rs"), program.program_code.as_bytes())?;
            write_json(&dir.join("signatures.json"), &program.signatures)?;
            write(
                &dir.join("service.rs"),
                render_service_stub(&program.target_lm).as_bytes(),
            )?;
        }
        PackageFormat::Image => {
            write(&dir.join("program.rs"), program.program_code.as_bytes())?;
            write(
                &dir.join("service.rs"),
                render_service_stub(&program.target_lm).as_bytes(),
            )?;
            write(&dir.join("Dockerfile"), render_dockerfile().as_bytes())?;
        }
    }

    log_info!(artifact_id = %artifact_id, format = format.as_str(), dir = %dir.display(), "Deployment package exported");
    Ok(dir)
}

fn render_service_stub(target_lm: &str) -> String {
    format!(
        "// Generated service entry point.\n\
         // Binds the compiled program to target LM '{target_lm}' and serves\n\
         // it behind a single invoke endpoint.\n\
         fn main() {{\n    // wire the program module into your serving stack here\n}}\n"
    )
}

fn render_dockerfile() -> String {
    "FROM rust:1.75-slim AS build\nWORKDIR /app\nCOPY . .\nRUN cargo build --release\n\n\
     FROM debian:bookworm-slim\nCOPY --from=build /app/target/release/service /usr/local/bin/service\n\
     ENTRYPOINT [\"/usr/local/bin/service\"]\n"
        .to_string()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> StudioResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StudioError::store(format!("serialization failed: {e}"), None))?;
    write(path, &bytes)
}

fn write(path: &Path, bytes: &[u8]) -> StudioResult<()> {
    fs::write(path, bytes)
        .map_err(|e| StudioError::store(format!("failed to write {}", path.display()), Some(e)))
}
