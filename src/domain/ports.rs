use crate::core::stage::StageIo;
use crate::domain::model::Headers;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::oneshot;

/// 階段的讀寫能力，在組裝管線時取得一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_read: bool,
    pub can_write: bool,
}

impl Capabilities {
    pub const SOURCE: Capabilities = Capabilities {
        can_read: true,
        can_write: false,
    };
    pub const SINK: Capabilities = Capabilities {
        can_read: false,
        can_write: true,
    };
    pub const DUPLEX: Capabilities = Capabilities {
        can_read: true,
        can_write: true,
    };
}

pub type TeardownHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// Optional cleanup hooks. The composer tries `close`, then `abort`; a stage
/// exposing neither is force-destroyed through its handle.
#[derive(Default)]
pub struct Teardown {
    pub close: Option<TeardownHook>,
    pub abort: Option<TeardownHook>,
}

impl Teardown {
    pub fn with_close<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.close = Some(Box::new(hook));
        self
    }

    pub fn with_abort<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.abort = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("close", &self.close.is_some())
            .field("abort", &self.abort.is_some())
            .finish()
    }
}

/// 上游生產者可提供的大小資訊，只讀
#[derive(Debug, Default)]
pub struct ProducerMetadata {
    /// Header-like metadata, e.g. from an HTTP response.
    pub headers: Option<Headers>,
    /// A size the producer knows directly, e.g. a file length.
    pub size: Option<u64>,
    /// Resolves once a producer that learns its size asynchronously has headers.
    pub late_headers: Option<oneshot::Receiver<Headers>>,
}

impl ProducerMetadata {
    pub fn from_headers(headers: Headers) -> Self {
        Self {
            headers: Some(headers),
            ..Default::default()
        }
    }

    pub fn from_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn late(receiver: oneshot::Receiver<Headers>) -> Self {
        Self {
            late_headers: Some(receiver),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Stage: Send + 'static {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn teardown(&self) -> Teardown {
        Teardown::default()
    }

    /// Queried once when this stage is piped into the next one.
    fn metadata(&mut self) -> Option<ProducerMetadata> {
        None
    }

    /// Called once when an upstream producer is piped into this stage.
    fn attach(&mut self, _upstream: Option<ProducerMetadata>) {}

    /// Drive the stage until its input is exhausted (or, for sources, its data is).
    /// Dropping `io` on return closes the downstream channel.
    async fn run(self: Box<Self>, io: StageIo) -> Result<()>;
}

/// 速度估算器使用的時鐘
pub trait TickSource: Send + Sync {
    fn now(&self) -> u16;
}
