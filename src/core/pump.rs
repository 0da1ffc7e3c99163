use crate::core::stage::{
    channel, lock, spawn_stage, EventKind, Inlet, LinkGuard, ListenerId, StageEvent, StageHandle,
    StageIo, DEFAULT_CAPACITY,
};
use crate::domain::ports::Stage;
use crate::utils::error::{FlowError, Result, SharedError};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// 管線完成時呼叫一次，失敗時帶著第一個錯誤
pub type Callback = Box<dyn FnOnce(Option<SharedError>) + Send>;

/// Connects an ordered list of stages and reports their combined outcome
/// exactly once.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    callback: Option<Callback>,
    capacity: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            callback: None,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            ..Self::new()
        }
    }

    pub fn stage<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Channel capacity between adjacent stages.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Option<SharedError>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Wire and start every stage. Returns the handle of the last stage.
    ///
    /// Layout problems are reported here, before any stage is touched.
    pub fn start(self) -> Result<StageHandle> {
        let mut handles = self.start_all()?;
        handles
            .pop()
            .ok_or_else(|| FlowError::config("At least two stages required"))
    }

    /// Like [`Pipeline::start`], but returns every stage's handle in order.
    pub fn start_all(self) -> Result<Vec<StageHandle>> {
        let Pipeline {
            mut stages,
            callback,
            capacity,
        } = self;

        validate_layout(&stages)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(FlowError::config(
                "Pipelines must be started from within a tokio runtime",
            ));
        }

        let count = stages.len();
        let handles: Vec<StageHandle> = stages
            .iter()
            .map(|stage| StageHandle::for_stage(stage.as_ref()))
            .collect();

        tracing::debug!(
            "Composing pipeline: {}",
            handles
                .iter()
                .map(StageHandle::name)
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        // pipe: 下游在啟動前收到上游的 metadata
        for i in 0..count - 1 {
            let metadata = stages[i].metadata();
            stages[i + 1].attach(metadata);
        }

        let coordinator = Arc::new(Mutex::new(Coordinator {
            // one End per non-last stage, one Finish per non-first stage
            pending: 2 * (count - 1),
            resolved: false,
            callback: Some(callback.unwrap_or_else(|| Box::new(|_| {}))),
            handles: handles.clone(),
            subscriptions: Vec::new(),
        }));

        let mut subscriptions = Vec::with_capacity(count * 3);
        for (i, handle) in handles.iter().enumerate() {
            let events = handle.events();

            let on_error = Arc::clone(&coordinator);
            subscriptions.push((
                i,
                events.once(EventKind::Error, move |event| {
                    if let StageEvent::Error(err) = event {
                        let resolution = lock(&on_error).fail(Arc::clone(err));
                        complete(resolution);
                    }
                }),
            ));

            if i < count - 1 {
                let on_end = Arc::clone(&coordinator);
                subscriptions.push((
                    i,
                    events.once(EventKind::End, move |_| {
                        let resolution = lock(&on_end).settle();
                        complete(resolution);
                    }),
                ));
            }

            if i > 0 {
                let on_finish = Arc::clone(&coordinator);
                subscriptions.push((
                    i,
                    events.once(EventKind::Finish, move |_| {
                        let resolution = lock(&on_finish).settle();
                        complete(resolution);
                    }),
                ));
            }
        }
        lock(&coordinator).subscriptions = subscriptions;

        let mut upstream: Option<(Inlet, Arc<AtomicBool>)> = None;
        for (i, (stage, handle)) in stages.into_iter().zip(handles.iter()).enumerate() {
            let (output, link, next) = if i < count - 1 {
                let (tx, rx) = channel(capacity);
                let done = Arc::new(AtomicBool::new(false));
                let link = LinkGuard::new(tx.clone(), Arc::clone(&done));
                (Some(tx), Some(link), Some((rx, done)))
            } else {
                (None, None, None)
            };

            let io = match upstream.take() {
                Some((input, done)) => StageIo::new(Some(input), output).linked(done),
                None => StageIo::new(None, output),
            };
            spawn_stage(stage, io, handle.clone(), link);
            upstream = next;
        }

        Ok(handles)
    }

    /// Start the pipeline and wait for its outcome.
    pub async fn run(self) -> std::result::Result<(), SharedError> {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome);
        })
        .start()
        .map_err(Arc::new)?;

        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(Arc::new(FlowError::stage(
                "pipeline",
                "completion callback dropped before firing",
            ))),
        }
    }
}

fn validate_layout(stages: &[Box<dyn Stage>]) -> Result<()> {
    if stages.len() < 2 {
        return Err(FlowError::config("At least two stages required"));
    }

    let last = stages.len() - 1;
    for (i, stage) in stages.iter().enumerate() {
        let caps = stage.capabilities();
        let needs_read = i < last;
        let needs_write = i > 0;
        if (needs_read && !caps.can_read) || (needs_write && !caps.can_write) {
            let position = match i {
                0 => "first",
                i if i == last => "last",
                _ => "interior",
            };
            return Err(FlowError::config(format!(
                "Stage '{}' cannot be the {} stage (readable: {}, writable: {})",
                stage.name(),
                position,
                caps.can_read,
                caps.can_write
            )));
        }
    }
    Ok(())
}

struct Coordinator {
    pending: usize,
    resolved: bool,
    callback: Option<Callback>,
    handles: Vec<StageHandle>,
    subscriptions: Vec<(usize, ListenerId)>,
}

impl Coordinator {
    fn fail(&mut self, err: SharedError) -> Option<Resolution> {
        if self.resolved {
            return None;
        }
        tracing::debug!("Pipeline failed: {}", err);
        Some(self.resolve(Some(err)))
    }

    fn settle(&mut self) -> Option<Resolution> {
        if self.resolved {
            return None;
        }
        self.pending = self.pending.saturating_sub(1);
        if self.pending == 0 {
            tracing::debug!("Pipeline completed");
            return Some(self.resolve(None));
        }
        None
    }

    /// Marks the pipeline resolved. The returned work runs after the
    /// coordinator lock is released.
    fn resolve(&mut self, outcome: Option<SharedError>) -> Resolution {
        self.resolved = true;
        Resolution {
            outcome,
            callback: self.callback.take(),
            handles: self.handles.clone(),
            subscriptions: std::mem::take(&mut self.subscriptions),
        }
    }
}

struct Resolution {
    outcome: Option<SharedError>,
    callback: Option<Callback>,
    handles: Vec<StageHandle>,
    subscriptions: Vec<(usize, ListenerId)>,
}

/// Unsubscribe, tear every stage down, then report the outcome.
fn complete(resolution: Option<Resolution>) {
    let Some(Resolution {
        outcome,
        callback,
        handles,
        subscriptions,
    }) = resolution
    else {
        return;
    };

    for (i, id) in subscriptions {
        handles[i].events().off(id);
    }
    for handle in &handles {
        handle.terminate();
    }
    if let Some(callback) = callback {
        callback(outcome);
    }
}

/// Compose `stages` and call `callback` once with the outcome.
pub fn compose<F>(stages: Vec<Box<dyn Stage>>, callback: F) -> Result<StageHandle>
where
    F: FnOnce(Option<SharedError>) + Send + 'static,
{
    Pipeline::from_stages(stages).on_complete(callback).start()
}

/// Compose `stages` and wait for the outcome.
pub async fn pump(stages: Vec<Box<dyn Stage>>) -> std::result::Result<(), SharedError> {
    Pipeline::from_stages(stages).run().await
}
