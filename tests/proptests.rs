// Content-addressed block-processing engine.
//! Property-based tests for the two pure, data-shape-sensitive algorithms
//! in the crate: hashing and the manifest's range-encoding.

use blockpipe::block::hash;
use blockpipe::manifest::proto::to_proto;
use blockpipe::manifest::{ManifestBlock, ManifestBuilder};
use blockpipe::BuildId;
use proptest::prelude::*;
use proptest_derive::Arbitrary;

/// An arbitrary instance of every field `BuildId` packs, for the round-trip
/// property below.
#[derive(Debug, Clone, Copy, Arbitrary)]
struct ArbitraryBuildId {
    project_id: u64,
    branch: u16,
    commit: [u8; 4],
    platform: u16,
}

proptest! {
    /// `BuildId` round-trips through its 16-byte big-endian encoding for
    /// every possible combination of fields, not just the fixed S6 sample.
    #[test]
    fn build_id_round_trips_for_arbitrary_fields(input: ArbitraryBuildId) {
        let id = BuildId::new(input.project_id, input.branch, input.commit, input.platform);
        let bytes = id.to_bytes();
        prop_assert_eq!(bytes.len(), 16);
        prop_assert_eq!(BuildId::from_bytes(&bytes), id);
    }

    /// Property 1: hashing is pure and its display form is always 86
    /// characters of URL-safe, unpadded base64.
    #[test]
    fn hash_is_deterministic_and_displays_as_86_chars(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let a = hash(&bytes);
        let b = hash(&bytes);
        prop_assert_eq!(a, b);
        let text = a.to_string();
        prop_assert_eq!(text.len(), 86);
        prop_assert!(!text.contains('+') && !text.contains('/') && !text.contains('='));
    }

    /// Property 5: an arbitrary strictly-increasing, contiguous sequence of
    /// pool ids serializes to exactly one range covering the whole run.
    #[test]
    fn contiguous_pool_ids_always_collapse_to_one_range(
        start_byte in 0u8..100,
        run_len in 1usize..30,
    ) {
        let builder = ManifestBuilder::new();
        let file = builder.add_file("x.bin");
        for i in 0..run_len {
            file.add_block(
                i as u64,
                ManifestBlock {
                    hash: hash(&[start_byte.wrapping_add(i as u8)]),
                    size: 1,
                },
            )
            .unwrap();
        }
        let manifest = builder.build().unwrap();
        let wire = to_proto(&manifest).unwrap();
        let item = wire.items.get("x.bin").unwrap();
        prop_assert_eq!(item.blocks.len(), 1);
        prop_assert_eq!(item.blocks[0].start_id, 1);
        prop_assert_eq!(item.blocks[0].size as usize, manifest.get("x.bin").unwrap().blocks.len());
    }
}
