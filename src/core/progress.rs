use crate::core::speed::SpeedEstimator;
use crate::core::stage::{channel, lock, Inlet, Outlet, StageIo, DEFAULT_CAPACITY};
use crate::core::ticker::SharedTicker;
use crate::domain::model::{Chunk, Headers, ProgressUpdate};
use crate::domain::ports::{Capabilities, ProducerMetadata, Stage, TickSource};
use crate::utils::error::Result;
use crate::utils::validation::{validate_range, Validate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// 進度階段的設定，時間單位皆為毫秒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressOptions {
    /// Expected total; 0 means unknown.
    pub length: u64,
    /// Minimum spacing between snapshots.
    pub time: u64,
    /// Consume input without waiting for a downstream reader.
    pub drain: bool,
    /// Starting offset for `transferred`.
    pub transferred: u64,
    /// Speed estimator window.
    pub speed: u64,
    /// Count one unit per chunk instead of its size.
    pub object_mode: bool,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            length: 0,
            time: 0,
            drain: false,
            transferred: 0,
            speed: 5000,
            object_mode: false,
        }
    }
}

impl Validate for ProgressOptions {
    fn validate(&self) -> Result<()> {
        validate_range("progress.speed", self.speed, 1, 3_600_000)?;
        validate_range("progress.time", self.time, 0, 3_600_000)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Idle,
    Active,
    Ended,
    Destroyed,
}

pub type ProgressListener = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;
pub type LengthListener = Arc<dyn Fn(u64) + Send + Sync>;

struct Tracker {
    state: ProgressState,
    object_mode: bool,
    length: u64,
    transferred: u64,
    delta: u64,
    interval: Duration,
    next_update: Instant,
    started: Instant,
    speed: SpeedEstimator,
    update: ProgressUpdate,
}

impl Tracker {
    fn new(options: &ProgressOptions, ticker: Arc<dyn TickSource>) -> Self {
        let now = Instant::now();
        let interval = Duration::from_millis(options.time);
        Self {
            state: ProgressState::Idle,
            object_mode: options.object_mode,
            length: options.length,
            transferred: options.transferred,
            delta: 0,
            interval,
            next_update: now + interval,
            started: now,
            speed: SpeedEstimator::from_millis(options.speed, ticker),
            update: ProgressUpdate {
                transferred: options.transferred,
                length: options.length,
                remaining: options.length.saturating_sub(options.transferred),
                ..Default::default()
            },
        }
    }

    fn record(&mut self, chunk: &Chunk) -> Option<ProgressUpdate> {
        if self.state == ProgressState::Idle {
            self.state = ProgressState::Active;
        }

        let units = if self.object_mode {
            1
        } else {
            chunk.len() as u64
        };
        self.transferred = self.transferred.saturating_add(units);
        self.delta = self.delta.saturating_add(units);
        self.update.transferred = self.transferred;
        self.update.remaining = self.length.saturating_sub(self.transferred);

        if Instant::now() >= self.next_update {
            Some(self.snapshot(false))
        } else {
            None
        }
    }

    fn finish(&mut self) -> Option<ProgressUpdate> {
        if matches!(self.state, ProgressState::Ended | ProgressState::Destroyed) {
            return None;
        }
        self.state = ProgressState::Ended;
        Some(self.snapshot(true))
    }

    fn snapshot(&mut self, ended: bool) -> ProgressUpdate {
        self.update.delta = self.delta;
        self.update.percentage = if self.length == 0 {
            0.0
        } else if ended {
            100.0
        } else {
            (self.transferred as f64 / self.length as f64 * 100.0).min(100.0)
        };
        self.update.speed = self.speed.sample(self.delta);
        self.update.eta = eta(self.update.remaining, self.update.speed);
        self.update.runtime = self.started.elapsed().as_secs() as f64;

        self.next_update = Instant::now() + self.interval;
        self.delta = 0;
        self.update.clone()
    }

    fn set_length(&mut self, length: u64) {
        self.length = length;
        self.update.length = length;
        self.update.remaining = length.saturating_sub(self.transferred);
    }

    fn current(&mut self) -> ProgressUpdate {
        self.update.speed = self.speed.sample(0);
        self.update.eta = eta(self.update.remaining, self.update.speed);
        self.update.clone()
    }
}

fn eta(remaining: u64, speed: f64) -> f64 {
    (remaining as f64 / speed.max(1.0)).round()
}

struct ProgressShared {
    tracker: Mutex<Tracker>,
    progress_listeners: Mutex<Vec<ProgressListener>>,
    length_listeners: Mutex<Vec<LengthListener>>,
}

/// Cloneable control surface of a [`ProgressStage`], usable while the stage
/// runs inside a pipeline.
#[derive(Clone)]
pub struct ProgressHandle {
    shared: Arc<ProgressShared>,
}

impl ProgressHandle {
    pub fn on_progress<F>(&self, listener: F)
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        lock(&self.shared.progress_listeners).push(Arc::new(listener));
    }

    pub fn on_length<F>(&self, listener: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        lock(&self.shared.length_listeners).push(Arc::new(listener));
    }

    /// 更新預期總量並通知 length 訂閱者
    pub fn set_length(&self, length: u64) {
        lock(&self.shared.tracker).set_length(length);
        tracing::debug!("Progress length set to {}", length);

        let listeners = lock(&self.shared.length_listeners).clone();
        for listener in listeners {
            listener(length);
        }
    }

    /// On-demand snapshot. Samples the speed estimator with a zero delta and
    /// leaves the counters untouched.
    pub fn progress(&self) -> ProgressUpdate {
        lock(&self.shared.tracker).current()
    }

    pub fn state(&self) -> ProgressState {
        lock(&self.shared.tracker).state
    }

    pub fn length(&self) -> u64 {
        lock(&self.shared.tracker).length
    }

    pub fn transferred(&self) -> u64 {
        lock(&self.shared.tracker).transferred
    }

    fn record(&self, chunk: &Chunk) {
        let update = lock(&self.shared.tracker).record(chunk);
        if let Some(update) = update {
            self.publish(&update);
        }
    }

    fn finish(&self) {
        let update = lock(&self.shared.tracker).finish();
        if let Some(update) = update {
            self.publish(&update);
        }
    }

    fn publish(&self, update: &ProgressUpdate) {
        let listeners = lock(&self.shared.progress_listeners).clone();
        for listener in listeners {
            listener(update);
        }
    }

    fn adopt_headers(&self, headers: &Headers) -> bool {
        match headers.expected_size() {
            Some(size) => {
                self.set_length(size);
                true
            }
            None => false,
        }
    }

    /// Terminal from any state, including after the final flush.
    fn mark_destroyed(&self) {
        lock(&self.shared.tracker).state = ProgressState::Destroyed;
    }
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracker = lock(&self.shared.tracker);
        f.debug_struct("ProgressHandle")
            .field("state", &tracker.state)
            .field("transferred", &tracker.transferred)
            .field("length", &tracker.length)
            .finish()
    }
}

/// Pass-through stage that counts what flows through it and publishes
/// throttled [`ProgressUpdate`] snapshots. Chunks are forwarded unchanged in
/// the same step they are counted, so downstream backpressure reaches
/// upstream untouched.
pub struct ProgressStage {
    name: String,
    drain: bool,
    attached: bool,
    handle: ProgressHandle,
    late_headers: Option<oneshot::Receiver<Headers>>,
}

impl ProgressStage {
    pub fn new(options: ProgressOptions) -> Self {
        Self::with_ticker(options, Arc::new(SharedTicker::get()))
    }

    pub fn with_ticker(options: ProgressOptions, ticker: Arc<dyn TickSource>) -> Self {
        Self {
            name: "progress".to_string(),
            drain: options.drain,
            attached: false,
            handle: ProgressHandle {
                shared: Arc::new(ProgressShared {
                    tracker: Mutex::new(Tracker::new(&options, ticker)),
                    progress_listeners: Mutex::new(Vec::new()),
                    length_listeners: Mutex::new(Vec::new()),
                }),
            },
            late_headers: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Subscribe to snapshots at construction time.
    pub fn on_progress<F>(self, listener: F) -> Self
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.handle.on_progress(listener);
        self
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    /// Run the stage on its own. In drain mode there is no output receiver
    /// and chunks are discarded after being counted.
    pub fn spawn(self) -> ProgressChannel {
        let (input, inlet) = channel(DEFAULT_CAPACITY);
        let (outlet, output) = if self.drain {
            (None, None)
        } else {
            let (tx, rx) = channel(DEFAULT_CAPACITY);
            (Some(tx), Some(rx))
        };
        let handle = self.handle();
        let task = tokio::spawn(Stage::run(
            Box::new(self),
            StageIo::new(Some(inlet), outlet),
        ));

        ProgressChannel {
            input,
            output,
            handle,
            task,
        }
    }
}

impl Drop for ProgressStage {
    fn drop(&mut self) {
        self.handle.mark_destroyed();
    }
}

#[async_trait]
impl Stage for ProgressStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DUPLEX
    }

    fn attach(&mut self, upstream: Option<ProducerMetadata>) {
        if self.attached {
            return;
        }
        self.attached = true;

        if self.handle.length() > 0 {
            return;
        }
        let Some(upstream) = upstream else {
            return;
        };

        if let Some(size) = upstream.headers.as_ref().and_then(Headers::expected_size) {
            tracing::debug!("Length {} taken from upstream headers", size);
            self.handle.set_length(size);
        } else if let Some(size) = upstream.size {
            tracing::debug!("Length {} taken from upstream size", size);
            self.handle.set_length(size);
        } else if let Some(late) = upstream.late_headers {
            self.late_headers = Some(late);
        }
    }

    async fn run(self: Box<Self>, mut io: StageIo) -> Result<()> {
        let mut stage = self;

        // 晚到的標頭在背景處理，不阻塞資料流
        if let Some(late) = stage.late_headers.take() {
            let handle = stage.handle();
            tokio::spawn(async move {
                if let Ok(headers) = late.await {
                    if handle.adopt_headers(&headers) {
                        tracing::debug!("Length taken from late upstream headers");
                    }
                }
            });
        }

        while let Some(chunk) = io.recv().await {
            stage.handle.record(&chunk);
            io.send(chunk).await;
        }

        // 上游失敗時不送出 100% 的最終快照
        io.ensure_upstream_completed(&stage.name)?;
        stage.handle.finish();
        Ok(())
    }
}

/// A standalone running [`ProgressStage`].
pub struct ProgressChannel {
    pub input: Outlet,
    /// `None` in drain mode.
    pub output: Option<Inlet>,
    pub handle: ProgressHandle,
    pub task: JoinHandle<Result<()>>,
}
