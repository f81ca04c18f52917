//! Property tests over randomly composed archives

mod common;

use common::{archiver, compute_spirv, flags, hlsl_graphics, spirv_compute};
use pso_archiver::archive::{ARCHIVE_VERSION, ArchiveReadError, ArchiveReader};
use pso_archiver::{Archiver, Backend, BackendFlags, ChunkKind};
use proptest::prelude::*;

/// One pipeline to add: a compute shader tag, or a graphics pipeline with a pixel shader variant
#[derive(Debug, Clone)]
enum Item {
    Compute { name: String, tag: u8 },
    Graphics { name: String, variant: u8, d3d12: bool },
}

impl Item {
    fn name(&self) -> &str {
        match self {
            Item::Compute { name, .. } | Item::Graphics { name, .. } => name,
        }
    }

    fn add(&self, archiver: &mut Archiver) -> pso_archiver::Result<()> {
        match self {
            Item::Compute { name, tag } => archiver.add_compute_pso(spirv_compute(name, compute_spirv(&format!("tag{tag}"))), flags(BackendFlags::VULKAN)),
            Item::Graphics { name, variant, d3d12 } => {
                let pixel = format!("float4 main() : SV_Target {{ return {variant}; }}");
                let backends = if *d3d12 { BackendFlags::VULKAN | BackendFlags::D3D12 } else { BackendFlags::VULKAN };
                archiver.add_graphics_pso(hlsl_graphics(name, VERTEX, Some(&pixel)), flags(backends))
            }
        }
    }
}

const VERTEX: &str = "// semantic: ATTRIB1\nfloat4 main(float4 pos : ATTRIB1) : SV_Position { return pos; }";

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        ("[a-z]{1,6}", 0u8..3).prop_map(|(name, tag)| Item::Compute { name: format!("c_{name}"), tag }),
        ("[a-z]{1,6}", 0u8..3, any::<bool>()).prop_map(|(name, variant, d3d12)| Item::Graphics { name: format!("g_{name}"), variant, d3d12 }),
    ]
}

/// Items with unique names
fn items() -> impl Strategy<Value = Vec<Item>> {
    prop::collection::vec(item(), 1..6).prop_map(|mut items| {
        let mut seen = std::collections::HashSet::new();
        items.retain(|item| seen.insert(item.name().to_string()));
        items
    })
}

fn build(items: &[Item]) -> bytes::Bytes {
    let mut archiver = archiver();
    for item in items {
        item.add(&mut archiver).unwrap();
    }
    archiver.serialize_to_blob().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn archives_are_deterministic(items in items()) {
        prop_assert_eq!(build(&items), build(&items));
    }

    #[test]
    fn reader_sees_every_item(items in items()) {
        let reader = ArchiveReader::open(build(&items)).unwrap();
        prop_assert!(reader.verify_offsets().is_ok());

        for kind in [ChunkKind::ComputePipelines, ChunkKind::GraphicsPipelines] {
            let names: Vec<String> = reader.named_resources(kind).into_iter().map(|entry| entry.name.to_string()).collect();
            let mut expected: Vec<String> = items
                .iter()
                .filter(|item| matches!((item, kind), (Item::Compute { .. }, ChunkKind::ComputePipelines) | (Item::Graphics { .. }, ChunkKind::GraphicsPipelines)))
                .map(|item| item.name().to_string())
                .collect();
            expected.sort();
            prop_assert_eq!(names, expected);
        }

        // Every pipeline has its synthesized default signature
        for item in &items {
            let signature = format!("Default Signature of PSO '{}'", item.name());
            prop_assert!(reader.find(ChunkKind::ResourceSignatures, &signature).is_some(), "{}", signature);
        }
    }

    #[test]
    fn shaders_are_stored_once(items in items()) {
        let reader = ArchiveReader::open(build(&items)).unwrap();
        for backend in [Backend::Vulkan, Backend::D3D12] {
            let shaders = reader.shaders(backend).unwrap();
            for (i, a) in shaders.iter().enumerate() {
                for b in &shaders[i + 1..] {
                    prop_assert!(a.code != b.code || a.stage != b.stage || a.entry_point != b.entry_point);
                }
            }
        }
    }

    #[test]
    fn failed_adds_leave_the_archive_unchanged(items in items(), position in any::<prop::sample::Index>()) {
        let mut archiver = archiver();
        let failing = position.index(items.len() + 1);
        for (i, item) in items.iter().enumerate() {
            if i == failing {
                let broken = hlsl_graphics("broken", VERTEX, Some("float4 main() : SV_Target { error }"));
                prop_assert!(archiver.add_graphics_pso(broken, flags(BackendFlags::VULKAN | BackendFlags::D3D12)).is_err());
            }
            item.add(&mut archiver).unwrap();
        }
        prop_assert_eq!(archiver.serialize_to_blob().unwrap(), build(&items));
    }

    #[test]
    fn other_versions_are_rejected(items in items()) {
        let archive = build(&items);
        prop_assert!(ArchiveReader::open_with_version(archive.clone(), ARCHIVE_VERSION).is_ok());
        let err = ArchiveReader::open_with_version(archive, ARCHIVE_VERSION - 1).unwrap_err();
        prop_assert_eq!(err, ArchiveReadError::VersionMismatch { found: ARCHIVE_VERSION, expected: ARCHIVE_VERSION - 1 });
    }
}
