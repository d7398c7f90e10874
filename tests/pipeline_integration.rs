// Content-addressed block-processing engine.
//! Whole-pipeline integration tests: a real directory tree, run through a
//! fan-out DAG (hash once, then branch into a manifest-building leg and a
//! dedup+compress+store leg), and the resulting manifest and store state
//! checked against the spec's scenarios.

use std::fs;
use std::io::Write;
use std::sync::Arc;

use blockpipe::manifest::ManifestBuilder;
use blockpipe::pipeline::{
    DedupProcessor, HashProcessor, ManifestBuilderSink, Pipeline, PipelineConfig, StoreSink,
    ZlibCompressProcessor,
};
use blockpipe::source::DirectoryWalkSource;
use blockpipe::store::Store;

fn temp_store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("blocks.redb")).unwrap());
    (dir, store)
}

/// S1: a single 2,097,153-byte file chunked at 1,048,576 bytes produces
/// three blocks (1,048,576 / 1,048,576 / 1), the first two sharing a hash,
/// collapsing to two pool entries and two ranges `{1,2}` and `{2,1}`.
#[tokio::test]
async fn s1_large_zero_file_collapses_to_two_pool_entries() {
    let src_dir = tempfile::tempdir().unwrap();
    let mut f = fs::File::create(src_dir.path().join("a.bin")).unwrap();
    f.write_all(&vec![0u8; 2_097_153]).unwrap();
    drop(f);

    let builder = Arc::new(ManifestBuilder::new());
    let config = PipelineConfig {
        chunk_size: 1_048_576,
        ..PipelineConfig::default()
    };
    Pipeline::run_batch(
        DirectoryWalkSource::new(src_dir.path()),
        vec![
            Arc::new(HashProcessor),
            Arc::new(ManifestBuilderSink::new(builder.clone())),
        ],
        config,
    )
    .await
    .unwrap();

    let manifest = builder.build().unwrap();
    let file = manifest.get("a.bin").unwrap();
    assert_eq!(
        file.blocks.iter().map(|b| b.size).collect::<Vec<_>>(),
        vec![1_048_576, 1_048_576, 1]
    );
    assert_eq!(file.blocks[0].hash, file.blocks[1].hash);
    assert_ne!(file.blocks[0].hash, file.blocks[2].hash);

    let wire = blockpipe::manifest::proto::to_proto(&manifest).unwrap();
    assert_eq!(wire.blocks.len(), 2);
    let item = wire.items.get("a.bin").unwrap();
    assert_eq!(item.blocks.len(), 2);
    assert_eq!((item.blocks[0].start_id, item.blocks[0].size), (1, 2));
    assert_eq!((item.blocks[1].start_id, item.blocks[1].size), (2, 1));
}

/// A fan-out DAG: one hash stage feeding both a manifest-building leg and
/// a dedup+compress+store leg. Every block reaches the manifest regardless
/// of dedup, but the store only holds one body per distinct hash.
#[tokio::test]
async fn fan_out_manifest_and_store_legs_agree_on_distinct_block_count() {
    let src_dir = tempfile::tempdir().unwrap();
    fs::write(src_dir.path().join("a.bin"), b"repeated-content-block").unwrap();
    fs::write(src_dir.path().join("b.bin"), b"repeated-content-block").unwrap();
    fs::write(src_dir.path().join("c.bin"), b"unique-content-block!!").unwrap();

    let (_dir, store) = temp_store();
    let builder = Arc::new(ManifestBuilder::new());

    let mut pipeline = Pipeline::new(Arc::new(HashProcessor));
    let root = pipeline.root();
    pipeline.par_do(root, Arc::new(ManifestBuilderSink::new(builder.clone())));
    let dedup = pipeline.par_do(root, Arc::new(DedupProcessor::default()));
    let compress = pipeline.par_do(dedup, Arc::new(ZlibCompressProcessor::new(6)));
    pipeline.par_do(compress, Arc::new(StoreSink::new(store.clone())));

    pipeline
        .execute(DirectoryWalkSource::new(src_dir.path()))
        .await
        .unwrap();

    let manifest = builder.build().unwrap();
    assert_eq!(manifest.len(), 3);

    let wire = blockpipe::manifest::proto::to_proto(&manifest).unwrap();
    // Two distinct contents across three files: the pool has 2 entries.
    assert_eq!(wire.blocks.len(), 2);

    let read = store.begin_read().unwrap();
    for block in &wire.blocks {
        assert!(read.get_block_body(&block.hash).unwrap().is_some());
    }
}

/// S3, driven end to end through a real pipeline run rather than hand-built
/// manifests: two builds sharing a block; deleting one leaves the shared
/// block live, deleting both reclaims it.
#[tokio::test]
async fn reference_counted_liveness_across_two_builds() {
    let src_dir = tempfile::tempdir().unwrap();
    fs::write(src_dir.path().join("f"), b"shared payload").unwrap();

    let (_dir, store) = temp_store();
    let builder = Arc::new(ManifestBuilder::new());
    let mut pipeline = Pipeline::new(Arc::new(HashProcessor));
    let root = pipeline.root();
    pipeline.par_do(root, Arc::new(ManifestBuilderSink::new(builder.clone())));
    pipeline.par_do(root, Arc::new(StoreSink::new(store.clone())));
    pipeline
        .execute(DirectoryWalkSource::new(src_dir.path()))
        .await
        .unwrap();
    let manifest = builder.build().unwrap();
    let wire = blockpipe::manifest::proto::to_proto(&manifest).unwrap();
    let hash = wire.blocks[0].hash;

    let b1 = blockpipe::BuildId::new(1, 0, [0, 0, 0, 0], 0);
    let b2 = blockpipe::BuildId::new(2, 0, [0, 0, 0, 0], 0);

    let txn = store.begin_write().unwrap();
    txn.put_build(b1, &wire).unwrap();
    txn.put_build(b2, &wire).unwrap();
    txn.commit().unwrap();

    let txn = store.begin_write().unwrap();
    txn.delete_build(b1).unwrap();
    txn.commit().unwrap();
    let read = store.begin_read().unwrap();
    assert!(read.is_block_live(&hash).unwrap());
    drop(read);

    let txn = store.begin_write().unwrap();
    txn.delete_build(b2).unwrap();
    txn.commit().unwrap();
    let read = store.begin_read().unwrap();
    assert!(!read.is_block_live(&hash).unwrap());
    assert!(read.get_block_body(&hash).unwrap().is_none());
}
