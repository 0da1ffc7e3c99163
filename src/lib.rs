pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::FlowConfig;

pub use adapters::{
    Body, Concat, ConcatSink, Encoding, FileSink, FileSource, HttpSource, IterSource, MapStage,
    PassThrough,
};
pub use core::progress::{
    ProgressChannel, ProgressHandle, ProgressOptions, ProgressStage, ProgressState,
};
pub use core::pump::{compose, pump, Pipeline};
pub use core::speed::SpeedEstimator;
pub use core::stage::{EventKind, StageEvent, StageHandle, StageIo, StageState};
pub use core::ticker::{ManualTicker, SharedTicker};
pub use domain::model::{Chunk, Headers, ProgressUpdate};
pub use domain::ports::{Capabilities, ProducerMetadata, Stage, Teardown, TickSource};
pub use utils::error::{FlowError, Result, SharedError};
