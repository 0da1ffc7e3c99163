pub mod progress;
pub mod pump;
pub mod speed;
pub mod stage;
pub mod ticker;

pub use crate::domain::model::{Chunk, Headers, ProgressUpdate};
pub use crate::domain::ports::{Capabilities, ProducerMetadata, Stage, Teardown, TickSource};
pub use crate::utils::error::{Result, SharedError};
