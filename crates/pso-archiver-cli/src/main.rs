//! Pipeline state archiver CLI
//!
//! Reads a JSON or YAML manifest of signatures and pipelines, archives every item for
//! the requested backends and writes the resulting DLAR archive.
//!
//! # Usage
//! ```bash
//! pso-archiver --out pipelines.bin --backend vulkan --backend gles --pso-json pipelines.yaml
//! ```
//!
//! Exits with 0 when every item was archived, 1 when the archive was written but some
//! items were dropped, and 2 when no archive could be written.

use clap::Parser;
use pso_archiver::archive::ArchiveReader;
use pso_archiver::manifest::DEFAULT_BACKENDS;
use pso_archiver::{Backend, BackendFlags};
use std::path::PathBuf;
use std::process::ExitCode;

/// Command-line arguments of the archiver
#[derive(Debug, Parser)]
#[command(version, about = "Compiles pipeline states for several graphics backends into one archive")]
struct Args {
    /// Output archive path
    #[arg(long)]
    out: PathBuf,

    /// Backend to archive items for (d3d11, d3d12, gl, gles, vulkan, metal_macos, metal_ios); repeat for several.
    /// Replaces the default backends of items that do not name their own
    #[arg(long = "backend")]
    backends: Vec<Backend>,

    /// Manifest listing the signatures and pipelines to archive (.json, .yaml or .yml)
    #[arg(long)]
    pso_json: PathBuf,

    /// Log every archived item
    #[arg(long, short)]
    verbose: bool,
}

/// Outcome of a run that produced an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Complete,
    Partial,
}

/// Archives the manifest and writes the archive
///
/// # Returns
/// Whether every item made it into the archive, or the error that prevented writing it
fn run(args: &Args) -> Result<Status, Box<dyn std::error::Error>> {
    let default_backends = if args.backends.is_empty() { DEFAULT_BACKENDS } else { args.backends.iter().copied().collect::<BackendFlags>() };

    let (archiver, outcome) = pso_archiver::archiver_from_manifest(&args.pso_json, default_backends)?;
    let archive = archiver.serialize_to_blob()?;

    // Check the image before it replaces anything on disk
    ArchiveReader::open(archive.clone())?.verify_offsets()?;
    std::fs::write(&args.out, &archive)?;
    tracing::info!("Wrote {} bytes to {}", archive.len(), args.out.display());

    if outcome.is_complete() {
        Ok(Status::Complete)
    } else {
        for dropped in &outcome.dropped {
            tracing::error!("'{}' was not archived: {}", dropped.name, dropped.error);
        }
        Ok(Status::Partial)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install the log subscriber: {e}");
    }

    match run(&args) {
        Ok(Status::Complete) => ExitCode::SUCCESS,
        Ok(Status::Partial) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pso_archiver::ChunkKind;

    const DOUBLER: &str = "#version 450
layout(local_size_x = 8) in;
layout(set = 0, binding = 0) buffer Data { uint values[]; };
void main() { values[gl_GlobalInvocationID.x] *= 2u; }
";

    fn manifest(pipelines: &[serde_json::Value]) -> String {
        serde_json::json!({ "pipelines": pipelines }).to_string()
    }

    fn compute(name: &str, glsl: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "compute",
            "name": name,
            "compute_shader": { "name": "CS", "stage": "compute", "source": { "glsl": glsl } },
        })
    }

    fn args(dir: &tempfile::TempDir, manifest: &str, backends: &[Backend]) -> Args {
        let pso_json = dir.path().join("manifest.json");
        std::fs::write(&pso_json, manifest).unwrap();
        Args {
            out: dir.path().join("archive.bin"),
            backends: backends.to_vec(),
            pso_json,
            verbose: false,
        }
    }

    #[test]
    fn test_arguments() {
        let args = Args::try_parse_from(["pso-archiver", "--out", "a.bin", "--backend", "vulkan", "--backend", "GLES", "--pso-json", "m.yaml", "-v"]).unwrap();
        assert_eq!(args.backends, vec![Backend::Vulkan, Backend::Gles]);
        assert!(args.verbose);

        assert!(Args::try_parse_from(["pso-archiver", "--out", "a.bin", "--backend", "directx", "--pso-json", "m.yaml"]).is_err());
        assert!(Args::try_parse_from(["pso-archiver", "--pso-json", "m.yaml"]).is_err());
    }

    #[test]
    fn test_complete_run() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(&dir, &manifest(&[compute("Doubler", DOUBLER)]), &[Backend::Vulkan]);
        assert_eq!(run(&args).unwrap(), Status::Complete);

        let reader = ArchiveReader::open(std::fs::read(&args.out).unwrap()).unwrap();
        assert!(reader.find(ChunkKind::ComputePipelines, "Doubler").is_some());
        assert_eq!(reader.shaders(Backend::Vulkan).unwrap().len(), 1);
        assert!(reader.shaders(Backend::Gl).unwrap().is_empty());
    }

    #[test]
    fn test_partial_run() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(&dir, &manifest(&[compute("Doubler", DOUBLER), compute("Broken", "void main() { nope }")]), &[Backend::Vulkan]);
        assert_eq!(run(&args).unwrap(), Status::Partial);

        let reader = ArchiveReader::open(std::fs::read(&args.out).unwrap()).unwrap();
        assert!(reader.find(ChunkKind::ComputePipelines, "Doubler").is_some());
        assert!(reader.find(ChunkKind::ComputePipelines, "Broken").is_none());
    }

    #[test]
    fn test_unreadable_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(&dir, "{ not json", &[]);
        assert!(run(&args).is_err());
        assert!(!args.out.exists());
    }
}
