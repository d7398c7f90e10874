// Content-addressed block-processing engine for build artifacts.

pub mod block;
pub mod buildid;
pub mod compress;
pub mod counters;
pub mod errors;
pub mod manifest;
pub mod pipeline;
pub mod source;
pub mod store;

pub use block::{Block, BlockHash, FileBlockData};
pub use buildid::BuildId;
pub use errors::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
