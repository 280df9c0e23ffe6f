//! Ingest pipeline for NZB manifests
//!
//! Turns a parsed [`Manifest`] into a tree of logical files in an
//! [`IndexStore`](nzbstream_index::IndexStore) without downloading content:
//!
//! 1. [`probe`] fetches the first article of every entry
//! 2. [`classify`] groups entries into stored files, RAR sets, 7z sets and
//!    split media
//! 3. [`extract`] walks archive headers through seekable [`stream`]s
//! 4. [`aggregate`] stages nodes and byte-range layouts
//! 5. [`pipeline`] commits the staged tree in one step and decides between
//!    completed, queued and failed
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nzbstream_index::MemoryIndexStore;
//! use nzbstream_ingest::{
//!     IngestConfig, IngestPipeline, IngestUnit, Manifest, MemoryHistory, ProgressReporter,
//!     SegmentTransport,
//! };
//! use nzbstream_pool::CancellationToken;
//!
//! # async fn run(transport: Arc<dyn SegmentTransport>, manifest: Manifest)
//! #     -> Result<(), nzbstream_ingest::IngestError> {
//! let pipeline = IngestPipeline::new(
//!     transport,
//!     Arc::new(MemoryIndexStore::new()),
//!     Arc::new(MemoryHistory::new()),
//!     IngestConfig::from_env(),
//! )?;
//! let unit = IngestUnit::new("42", "Some.Movie.2024", "movies");
//! let outcome = pipeline
//!     .ingest(&manifest, &unit, &CancellationToken::new(), &ProgressReporter::disabled())
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod history;
pub mod manifest;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use aggregate::{AggregateOptions, CONTENT_DIR, TreeBuilder, aggregate};
pub use classify::{FileGroups, classify};
pub use config::IngestConfig;
pub use error::{IngestError, IngestResult, TransportError, TransportResult};
pub use extract::{Extracted, Extractor};
pub use history::{HistoryEntry, HistoryStatus, HistoryStore, MemoryHistory};
pub use manifest::{Manifest, ManifestMetadata, NzbFile, NzbSegment};
pub use pipeline::{IngestOutcome, IngestPipeline, IngestUnit};
pub use probe::{ProbedFile, probe_files};
pub use progress::{IngestProgress, IngestStage, ProgressReporter};
pub use stream::{ConcatStream, RandomAccess, SegmentStream};
pub use transport::{Article, ArticleConnection, ArticleHeader, PooledTransport, SegmentTransport};
