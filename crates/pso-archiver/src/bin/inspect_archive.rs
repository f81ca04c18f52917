//! Archive inspection tool
//!
//! This binary loads a DLAR archive, verifies that every offset stays inside the
//! archive, and prints its directory: chunks, named resources and shaders per backend.

use pso_archiver::archive::ArchiveReader;
use pso_archiver::{Backend, ChunkKind};
use std::env;
use std::fs;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <archive.bin>", args[0]);
        eprintln!("Verifies a pipeline state archive and dumps its directory to stdout");
        process::exit(1);
    }

    let archive_path = &args[1];
    let data = match fs::read(archive_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error: Cannot read archive '{archive_path}': {e}");
            process::exit(1);
        }
    };

    let reader = match ArchiveReader::open(data) {
        Ok(reader) => reader,
        Err(e) => {
            eprintln!("Error: '{archive_path}' is not a valid archive: {e}");
            process::exit(1);
        }
    };

    println!("Archive '{archive_path}': version {}, {} bytes", reader.version(), reader.size());
    if let Some(debug_info) = reader.debug_info() {
        println!("Built by {} (format version {})", debug_info.builder_id, debug_info.version);
    }

    // Directory
    for chunk in reader.chunks() {
        println!("[{}] {} bytes at {}", chunk.kind, chunk.size, chunk.offset);
        if !chunk.kind.is_named() {
            continue;
        }
        for entry in reader.named_resources(chunk.kind) {
            println!("  {:?}: {} bytes at {}", entry.name, entry.size, entry.offset);
            if let Ok(pipeline) = reader.pipeline(chunk.kind, &entry.name) {
                let backends: Vec<String> = Backend::ALL
                    .iter()
                    .filter_map(|backend| pipeline.device[backend.index()].as_ref().map(|device| format!("{} {:?}", backend.tag(), device.shaders)))
                    .collect();
                println!("    signatures {:?}, render pass {:?}, shaders: {}", pipeline.signatures, pipeline.render_pass, backends.join(", "));
            } else if chunk.kind == ChunkKind::ResourceSignatures {
                if let Ok(signature) = reader.signature(&entry.name) {
                    let backends: Vec<&str> = Backend::ALL.iter().filter(|backend| signature.device[backend.index()].is_some()).map(|backend| backend.tag()).collect();
                    println!("    backends: {}", backends.join(", "));
                }
            }
        }
    }

    // Shaders
    for backend in Backend::ALL {
        match reader.shaders(backend) {
            Ok(shaders) if shaders.is_empty() => {}
            Ok(shaders) => {
                println!("{backend} shaders:");
                for (index, shader) in shaders.iter().enumerate() {
                    println!("  #{index}: {} '{}', {} bytes", shader.stage, shader.entry_point, shader.code.len());
                }
            }
            Err(e) => {
                eprintln!("Error: Cannot read {backend} shaders: {e}");
                process::exit(1);
            }
        }
    }

    if let Err(e) = reader.verify_offsets() {
        eprintln!("Error: Offset check failed: {e}");
        process::exit(1);
    }
    println!("All offsets are valid");
}
