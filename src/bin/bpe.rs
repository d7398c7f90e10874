// Content-addressed block-processing engine.

//! `bpe`: a small CLI wrapping the manifest-generator pipeline
//! (`[HashProcessor, ManifestBuilderSink]` over an [ArchiveSource]).

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use blockpipe::manifest::{Manifest, ManifestBuilder};
use blockpipe::pipeline::{HashProcessor, ManifestBuilderSink, Pipeline, PipelineConfig};
use blockpipe::source::ArchiveSource;
use blockpipe::Result;
use clap::Parser;
use zip::ZipArchive;

/// Generate a build manifest from a zip archive.
#[derive(Parser, Debug)]
#[command(name = "bpe", version, about)]
struct Args {
    /// Path to the input zip archive.
    #[arg(long)]
    input: PathBuf,

    /// Path to write the manifest's text form; stdout if omitted.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Byte length of every block except possibly a file's last.
    #[arg(long, default_value_t = blockpipe::pipeline::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

fn render(manifest: &Manifest) -> String {
    let mut out = String::new();
    for file in manifest.files() {
        out.push_str(file.path.as_str());
        out.push_str(" -> ");
        let mut offset = 0u64;
        let parts: Vec<String> = file
            .blocks
            .iter()
            .map(|b| {
                let part = format!("{}@{}+{}", b.hash, offset, b.size);
                offset += b.size;
                part
            })
            .collect();
        out.push_str(&parts.join(", "));
        out.push('\n');
    }
    out
}

async fn run(args: Args) -> Result<()> {
    let file = File::open(&args.input)?;
    let archive = ZipArchive::new(file).map_err(blockpipe::Error::Zip)?;
    let builder = Arc::new(ManifestBuilder::new());

    Pipeline::run_batch(
        ArchiveSource::new(archive),
        vec![
            Arc::new(HashProcessor),
            Arc::new(ManifestBuilderSink::new(builder.clone())),
        ],
        PipelineConfig {
            chunk_size: args.chunk_size,
            ..PipelineConfig::default()
        },
    )
    .await?;

    let manifest = builder.build()?;
    let text = render(&manifest);
    match args.output {
        Some(path) => File::create(path)?.write_all(text.as_bytes())?,
        None => print!("{text}"),
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bpe: {e}");
            ExitCode::FAILURE
        }
    }
}
