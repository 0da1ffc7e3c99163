use crate::core::stage::StageIo;
use crate::domain::model::Chunk;
use crate::domain::ports::{Capabilities, ProducerMetadata, Stage};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 從迭代器產生資料的來源階段
pub struct IterSource {
    name: String,
    chunks: Box<dyn Iterator<Item = Chunk> + Send>,
    metadata: Option<ProducerMetadata>,
}

impl IterSource {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Chunk>,
        I::IntoIter: Send + 'static,
    {
        Self {
            name: "iter-source".to_string(),
            chunks: Box::new(chunks.into_iter()),
            metadata: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Metadata handed to the next stage when the pipeline is wired.
    pub fn with_metadata(mut self, metadata: ProducerMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait]
impl Stage for IterSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SOURCE
    }

    fn metadata(&mut self) -> Option<ProducerMetadata> {
        self.metadata.take()
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        let IterSource { name, chunks, .. } = *self;
        for chunk in chunks {
            if !io.send(chunk).await {
                tracing::debug!("Downstream of '{}' closed early", name);
                break;
            }
        }
        Ok(())
    }
}

/// Forwards every chunk unchanged.
pub struct PassThrough {
    name: String,
}

impl PassThrough {
    pub fn new() -> Self {
        Self {
            name: "pass-through".to_string(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for PassThrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        while let Some(chunk) = io.recv().await {
            io.send(chunk).await;
        }
        io.ensure_upstream_completed(&self.name)
    }
}

type MapFn = Box<dyn FnMut(Chunk) -> Result<Chunk> + Send>;

/// Applies a fallible function to every chunk; the first error fails the stage.
pub struct MapStage {
    name: String,
    map: MapFn,
}

impl MapStage {
    pub fn new<F>(name: impl Into<String>, map: F) -> Self
    where
        F: FnMut(Chunk) -> Result<Chunk> + Send + 'static,
    {
        Self {
            name: name.into(),
            map: Box::new(map),
        }
    }
}

#[async_trait]
impl Stage for MapStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        let MapStage { name, mut map } = *self;
        while let Some(chunk) = io.recv().await {
            let mapped = map(chunk)?;
            io.send(mapped).await;
        }
        io.ensure_upstream_completed(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::channel;
    use crate::utils::error::FlowError;

    #[tokio::test]
    async fn test_iter_source_emits_in_order() {
        let (tx, mut rx) = channel(4);
        let source = Box::new(IterSource::new(vec![Chunk::from("a"), Chunk::from("b")]));
        source.run(StageIo::new(None, Some(tx))).await.unwrap();

        assert_eq!(rx.recv().await, Some(Chunk::from("a")));
        assert_eq!(rx.recv().await, Some(Chunk::from("b")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_iter_source_stops_when_downstream_is_gone() {
        let (tx, rx) = channel(1);
        drop(rx);
        let source = Box::new(IterSource::new(std::iter::repeat(Chunk::from("x"))));
        // 無限來源也能結束
        source.run(StageIo::new(None, Some(tx))).await.unwrap();
    }

    #[tokio::test]
    async fn test_map_stage_propagates_errors() {
        let (in_tx, in_rx) = channel(2);
        let (out_tx, _out_rx) = channel(2);
        let stage = Box::new(MapStage::new("fail", |_| Err(FlowError::stage("fail", "nope"))));

        in_tx.send(Chunk::from("data")).await.unwrap();
        drop(in_tx);

        let err = stage
            .run(StageIo::new(Some(in_rx), Some(out_tx)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Stage 'fail' failed: nope");
    }
}
