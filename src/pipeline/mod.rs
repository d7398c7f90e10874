// Content-addressed block-processing engine.

//! The concurrent DAG runtime: wires a [dag::Dag] of [processor::BlockProcessor]
//! stages to a [crate::source::BlockSource] and drives every block through
//! it with bounded, per-stage concurrency.
//!
//! Each stage receives its input on a bounded channel, spawns up to
//! `worker_cap` concurrent tasks to run its processor, and broadcasts every
//! carrier it produces to each child's own bounded input channel — a slow
//! child only ever slows itself and its ancestors, never its siblings. A
//! processor error is published on a single shared, capacity-1 error
//! channel (first error wins) without cancelling any other in-flight block.

pub mod dag;
pub mod processor;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

pub use dag::{Dag, NodeId};
pub use processor::{
    BlockProcessor, DedupAction, DedupProcessor, HashProcessor, HttpFetchProcessor,
    ManifestBuilderSink, StoreSink, ValidateProcessor, ZlibCompressProcessor,
    ZlibDecompressProcessor,
};

use crate::block::FileBlockData;
use crate::counters::{Counter, Counters};
use crate::errors::{Error, Result};
use crate::source::{BlockSource, DEFAULT_SOURCE_BUFFER};

/// Reference chunk size used when a caller doesn't pick one: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Tunables for a pipeline run: how big a block is, how far a stage may
/// run ahead of a slow consumer, and how many blocks a single stage may
/// process concurrently.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Byte length of every emitted block except possibly the last block
    /// of a file.
    pub chunk_size: usize,
    /// Capacity of every inter-stage channel (source→root and parent→child).
    pub buffer_size: usize,
    /// Maximum number of blocks a single stage processes concurrently.
    pub worker_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: DEFAULT_SOURCE_BUFFER,
            worker_cap: 8,
        }
    }
}

/// A rooted DAG of processing stages, ready to run once over a source.
///
/// Construct with [Pipeline::new], add stages with [Pipeline::par_do], and
/// consume with [Pipeline::execute]. For the common case of a single linear
/// chain ending in one or more sinks, [Pipeline::run_batch] builds the chain
/// for you.
pub struct Pipeline {
    dag: Dag,
    config: PipelineConfig,
    counters: Arc<Counters>,
}

impl Pipeline {
    /// Start a new pipeline whose root stage runs `processor`.
    pub fn new(processor: Arc<dyn BlockProcessor>) -> Self {
        Pipeline::with_config(processor, PipelineConfig::default())
    }

    pub fn with_config(processor: Arc<dyn BlockProcessor>, config: PipelineConfig) -> Self {
        Pipeline {
            dag: Dag::new(processor),
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The id of the stage that receives carriers directly from the source.
    pub fn root(&self) -> NodeId {
        self.dag.root()
    }

    /// Add a new stage as a child of `parent`; it receives every carrier
    /// `parent`'s processor emits. Returns the new stage's id.
    pub fn par_do(&mut self, parent: NodeId, processor: Arc<dyn BlockProcessor>) -> NodeId {
        self.dag.par_do(parent, processor)
    }

    /// The counters this run will accumulate into. Read after [Pipeline::execute]
    /// returns, or concurrently while it runs for a live view.
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Run a single linear chain `p0 -> p1 -> ... -> pn` over `source`.
    ///
    /// Equivalent to building the same chain with [Pipeline::new] and
    /// repeated [Pipeline::par_do] calls, provided as a convenience for the
    /// common case where no stage fans out to more than one child.
    pub async fn run_batch(
        source: impl BlockSource,
        processors: Vec<Arc<dyn BlockProcessor>>,
        config: PipelineConfig,
    ) -> Result<()> {
        let mut processors = processors.into_iter();
        let first = processors
            .next()
            .expect("run_batch requires at least one processor");
        let mut pipeline = Pipeline::with_config(first, config);
        let mut node = pipeline.root();
        for processor in processors {
            node = pipeline.par_do(node, processor);
        }
        pipeline.execute(source).await
    }

    /// Run the pipeline to completion against `source`, with no external
    /// cancellation source.
    pub async fn execute(self, source: impl BlockSource) -> Result<()> {
        self.execute_with_cancel(source, CancellationToken::new())
            .await
    }

    /// Run the pipeline to completion against `source`, honoring `cancel`.
    ///
    /// Returns the first error observed by any stage or the source, if any;
    /// otherwise [Error::Cancelled] if `cancel` fired before every block had
    /// drained; otherwise `Ok(())`.
    #[instrument(skip_all)]
    pub async fn execute_with_cancel(
        self,
        source: impl BlockSource,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Pipeline {
            dag,
            config,
            counters,
        } = self;
        let n = dag.len();

        let mut senders: Vec<mpsc::Sender<FileBlockData>> = Vec::with_capacity(n);
        let mut receivers: Vec<Option<mpsc::Receiver<FileBlockData>>> = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
            senders.push(tx);
            receivers.push(Some(rx));
        }

        // Capacity 1: the first error published wins; later sends are
        // silently dropped once the slot is full.
        let (error_tx, mut error_rx) = mpsc::channel::<Error>(1);

        let source_rx = source.spawn(config.chunk_size, cancel.clone());
        let root = dag.root();

        let mut handles = Vec::with_capacity(n);
        for id in 0..n {
            let node_id = NodeId(id);
            let children: Vec<mpsc::Sender<FileBlockData>> = dag
                .children_of(node_id)
                .iter()
                .map(|child| senders[child.0].clone())
                .collect();
            let processor = dag.processor_of(node_id);
            let error_tx = error_tx.clone();
            let counters = counters.clone();
            let cancel = cancel.clone();
            let worker_cap = config.worker_cap;
            if node_id == root {
                handles.push(tokio::spawn(run_root_stage(
                    id, source_rx, processor, worker_cap, children, error_tx, counters, cancel,
                )));
                continue;
            }
            let rx = receivers[id].take().expect("each receiver taken once");
            handles.push(tokio::spawn(run_stage(
                id, rx, processor, worker_cap, children, error_tx, counters, cancel,
            )));
        }
        // Drop the top-level clones: only the clones each stage task holds
        // (for the duration of its own run) keep a child's channel open.
        drop(senders);

        for handle in handles {
            handle.await.expect("pipeline stage task panicked");
        }

        if let Ok(err) = error_rx.try_recv() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_root_stage(
    id: usize,
    mut rx: mpsc::Receiver<Result<FileBlockData>>,
    processor: Arc<dyn BlockProcessor>,
    worker_cap: usize,
    children: Vec<mpsc::Sender<FileBlockData>>,
    error_tx: mpsc::Sender<Error>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(worker_cap.max(1)));
    let mut in_flight = JoinSet::new();
    loop {
        if cancel.is_cancelled() {
            counters.count(Counter::Cancelled, 1);
            break;
        }
        let item = tokio::select! {
            item = rx.recv() => item,
            _ = cancel.cancelled() => {
                counters.count(Counter::Cancelled, 1);
                break;
            }
        };
        let carrier = match item {
            None => break,
            Some(Ok(carrier)) => carrier,
            Some(Err(e)) => {
                warn!(stage = id, error = %e, "source reported an error");
                let _ = error_tx.try_send(e);
                break;
            }
        };
        spawn_block(
            &semaphore,
            &mut in_flight,
            id,
            carrier,
            processor.clone(),
            children.clone(),
            error_tx.clone(),
            counters.clone(),
        )
        .await;
    }
    while in_flight.join_next().await.is_some() {}
}

#[allow(clippy::too_many_arguments)]
async fn run_stage(
    id: usize,
    mut rx: mpsc::Receiver<FileBlockData>,
    processor: Arc<dyn BlockProcessor>,
    worker_cap: usize,
    children: Vec<mpsc::Sender<FileBlockData>>,
    error_tx: mpsc::Sender<Error>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(worker_cap.max(1)));
    let mut in_flight = JoinSet::new();
    loop {
        if cancel.is_cancelled() {
            counters.count(Counter::Cancelled, 1);
            break;
        }
        let item = tokio::select! {
            item = rx.recv() => item,
            _ = cancel.cancelled() => {
                counters.count(Counter::Cancelled, 1);
                break;
            }
        };
        let Some(carrier) = item else { break };
        spawn_block(
            &semaphore,
            &mut in_flight,
            id,
            carrier,
            processor.clone(),
            children.clone(),
            error_tx.clone(),
            counters.clone(),
        )
        .await;
    }
    while in_flight.join_next().await.is_some() {}
}

/// Acquire a worker-cap permit and spawn one task to run `processor` on
/// `carrier`, broadcasting the result to every child on success.
#[allow(clippy::too_many_arguments)]
async fn spawn_block(
    semaphore: &Arc<Semaphore>,
    in_flight: &mut JoinSet<()>,
    stage_id: usize,
    carrier: FileBlockData,
    processor: Arc<dyn BlockProcessor>,
    children: Vec<mpsc::Sender<FileBlockData>>,
    error_tx: mpsc::Sender<Error>,
    counters: Arc<Counters>,
) {
    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("stage semaphore is never closed");
    let path = carrier.path().to_string();
    let block_id = carrier.block_id();
    in_flight.spawn(async move {
        let _permit = permit;
        match processor.process(carrier).await {
            Ok(Some(result)) => {
                trace!(stage = stage_id, %path, block_id, "stage published block");
                counters.count(Counter::Blocks, 1);
                counters.count(Counter::BlockBytes, result.size() as usize);
                for child in &children {
                    let _ = child.send(result.clone()).await;
                }
            }
            Ok(None) => {
                trace!(stage = stage_id, %path, block_id, "stage dropped block (filter)");
                counters.count(Counter::BlocksDeduplicated, 1);
            }
            Err(e) => {
                warn!(stage = stage_id, %path, block_id, error = %e, "stage failed block");
                counters.count(Counter::Errors, 1);
                let _ = error_tx.try_send(e);
            }
        }
    });
}
