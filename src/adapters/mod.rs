// Adapters layer: concrete stages for files, HTTP and in-memory data.

pub mod concat;
pub mod file;
pub mod http;
pub mod memory;

pub use concat::{Body, Concat, ConcatSink, Encoding};
pub use file::{FileSink, FileSource};
pub use http::HttpSource;
pub use memory::{IterSource, MapStage, PassThrough};
