use crate::core::stage::StageIo;
use crate::domain::model::Chunk;
use crate::domain::ports::{Capabilities, ProducerMetadata, Stage};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// 讀取本地檔案，並把檔案大小提供給下游
pub struct FileSource {
    path: PathBuf,
    file: File,
    size: u64,
    read_size: usize,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        tracing::debug!("Opened {} ({} bytes)", path.display(), size);
        Ok(Self {
            path,
            file,
            size,
            read_size: DEFAULT_READ_SIZE,
        })
    }

    pub fn read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[async_trait]
impl Stage for FileSource {
    fn name(&self) -> &str {
        "file-source"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SOURCE
    }

    fn metadata(&mut self) -> Option<ProducerMetadata> {
        Some(ProducerMetadata::from_size(self.size))
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        let FileSource {
            path,
            mut file,
            read_size,
            ..
        } = *self;
        let mut buf = vec![0u8; read_size];

        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            if !io.send(Chunk::Bytes(buf[..read].to_vec())).await {
                tracing::debug!("Stopped reading {}: downstream closed", path.display());
                break;
            }
        }
        Ok(())
    }
}

/// Writes every chunk to a file, created (or truncated) when the stage starts.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Stage for FileSink {
    fn name(&self) -> &str {
        "file-sink"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SINK
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = File::create(&self.path).await?;
        let mut written = 0u64;
        while let Some(chunk) = io.recv().await {
            match &chunk {
                Chunk::Bytes(bytes) => file.write_all(bytes).await?,
                other => file.write_all(&other.to_bytes()).await?,
            }
            written += chunk.len() as u64;
        }
        file.flush().await?;
        io.ensure_upstream_completed("file-sink")?;

        tracing::debug!("Wrote {} bytes to {}", written, self.path.display());
        Ok(())
    }
}
