use crate::domain::model::Chunk;
use crate::domain::ports::{Capabilities, Stage, Teardown};
use crate::utils::error::{FlowError, Result, SharedError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// 相鄰階段之間的通道容量 (以 chunk 計)
pub const DEFAULT_CAPACITY: usize = 16;

pub type Inlet = mpsc::Receiver<Chunk>;
pub type Outlet = mpsc::Sender<Chunk>;

pub fn channel(capacity: usize) -> (Outlet, Inlet) {
    mpsc::channel(capacity.max(1))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The two ends a stage is wired to. Sources have no input; the last stage of
/// a pipeline has no output, and whatever it sends is dropped.
#[derive(Debug, Default)]
pub struct StageIo {
    input: Option<Inlet>,
    output: Option<Outlet>,
    upstream_done: Option<Arc<AtomicBool>>,
}

impl StageIo {
    pub fn new(input: Option<Inlet>, output: Option<Outlet>) -> Self {
        Self {
            input,
            output,
            upstream_done: None,
        }
    }

    /// Input fed by a pipeline link whose completion flag is set only when
    /// the upstream stage ran to a clean end.
    pub(crate) fn linked(mut self, upstream_done: Arc<AtomicBool>) -> Self {
        self.upstream_done = Some(upstream_done);
        self
    }

    /// Whether the input closed at a real end of stream. A closed channel
    /// alone may mean upstream failed or was torn down. Inputs fed directly
    /// through an [`Outlet`] end cleanly when every sender is dropped.
    pub fn upstream_completed(&self) -> bool {
        self.upstream_done
            .as_ref()
            .map_or(true, |done| done.load(Ordering::Acquire))
    }

    /// Fails `stage` when its input closed without a clean end of stream.
    pub fn ensure_upstream_completed(&self, stage: &str) -> Result<()> {
        if self.upstream_completed() {
            Ok(())
        } else {
            Err(FlowError::stage(stage, "upstream closed before end of stream"))
        }
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Next chunk from upstream, `None` once upstream has ended.
    pub async fn recv(&mut self) -> Option<Chunk> {
        match self.input.as_mut() {
            Some(input) => input.recv().await,
            None => None,
        }
    }

    /// Waits for downstream capacity. Returns `false` when the chunk was not
    /// delivered because there is no downstream or it has gone away.
    pub async fn send(&mut self, chunk: Chunk) -> bool {
        match self.output.as_ref() {
            Some(output) => output.send(chunk).await.is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Idle,
    Active,
    Ended,
    Errored,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Readable side delivered its last chunk.
    End,
    /// Writable side consumed all of its input.
    Finish,
    Error,
}

#[derive(Debug, Clone)]
pub enum StageEvent {
    End,
    Finish,
    Error(SharedError),
}

impl StageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StageEvent::End => EventKind::End,
            StageEvent::Finish => EventKind::Finish,
            StageEvent::Error(_) => EventKind::Error,
        }
    }
}

pub type Listener = Arc<dyn Fn(&StageEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Subscription {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    listener: Listener,
}

/// Listener registry for one stage's terminal events.
#[derive(Default)]
pub struct StageEvents {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl StageEvents {
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StageEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, false, Arc::new(listener))
    }

    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StageEvent) + Send + Sync + 'static,
    {
        self.subscribe(kind, true, Arc::new(listener))
    }

    fn subscribe(&self, kind: EventKind, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).push(Subscription {
            id,
            kind,
            once,
            listener,
        });
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Calls every matching listener and returns how many ran. Listeners run
    /// without the registry lock held, so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &StageEvent) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener> = {
            let mut subscriptions = lock(&self.subscriptions);
            let matching = subscriptions
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| Arc::clone(&s.listener))
                .collect();
            subscriptions.retain(|s| !(s.once && s.kind == kind));
            matching
        };

        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }
}

struct StageShared {
    name: String,
    capabilities: Capabilities,
    teardown: Teardown,
    state: Mutex<StageState>,
    events: StageEvents,
    task: Mutex<Option<AbortHandle>>,
}

/// Shared view of a stage: its capability descriptor, lifecycle state and
/// events. The stage value itself is moved into its driving task.
#[derive(Clone)]
pub struct StageHandle {
    inner: Arc<StageShared>,
}

impl StageHandle {
    pub fn new(name: impl Into<String>, capabilities: Capabilities, teardown: Teardown) -> Self {
        Self {
            inner: Arc::new(StageShared {
                name: name.into(),
                capabilities,
                teardown,
                state: Mutex::new(StageState::Idle),
                events: StageEvents::default(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn for_stage(stage: &dyn Stage) -> Self {
        Self::new(stage.name(), stage.capabilities(), stage.teardown())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub fn events(&self) -> &StageEvents {
        &self.inner.events
    }

    pub fn state(&self) -> StageState {
        *lock(&self.inner.state)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == StageState::Destroyed
    }

    /// Destroyed is terminal; later transitions are ignored.
    pub(crate) fn set_state(&self, next: StageState) -> bool {
        let mut state = lock(&self.inner.state);
        if *state == StageState::Destroyed {
            return false;
        }
        *state = next;
        true
    }

    pub(crate) fn bind_task(&self, task: AbortHandle) {
        if self.is_destroyed() {
            task.abort();
            return;
        }
        *lock(&self.inner.task) = Some(task);
    }

    /// Forced teardown: marks the stage destroyed and cancels its task.
    /// Returns `false` when it was already destroyed.
    pub fn destroy(&self) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if *state == StageState::Destroyed {
                return false;
            }
            *state = StageState::Destroyed;
        }
        if let Some(task) = lock(&self.inner.task).take() {
            task.abort();
        }
        true
    }

    /// Best-effort cleanup: close, else abort, then destroy. Hook failures are
    /// logged and swallowed.
    pub fn terminate(&self) {
        if self.is_destroyed() {
            return;
        }

        let teardown = &self.inner.teardown;
        let hook = teardown
            .close
            .as_ref()
            .map(|hook| ("close", hook))
            .or_else(|| teardown.abort.as_ref().map(|hook| ("abort", hook)));

        if let Some((step, hook)) = hook {
            if let Err(e) = hook() {
                tracing::debug!("Ignoring {} failure on stage '{}': {}", step, self.name(), e);
            }
        }
        self.destroy();
    }

    pub fn ptr_eq(&self, other: &StageHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageHandle")
            .field("name", &self.inner.name)
            .field("capabilities", &self.inner.capabilities)
            .field("state", &self.state())
            .finish()
    }
}

/// Upstream end of a pipeline link. Holding a sender keeps the channel open
/// until the driver has recorded how the stage ended, so downstream never
/// sees the close before the completion flag or the error event.
pub(crate) struct LinkGuard {
    _sender: Outlet,
    done: Arc<AtomicBool>,
}

impl LinkGuard {
    pub(crate) fn new(sender: Outlet, done: Arc<AtomicBool>) -> Self {
        Self {
            _sender: sender,
            done,
        }
    }
}

/// Spawn the task that drives `stage` and reports its terminal events on `handle`.
pub(crate) fn spawn_stage(
    stage: Box<dyn Stage>,
    io: StageIo,
    handle: StageHandle,
    link: Option<LinkGuard>,
) {
    let driver = handle.clone();
    let task = tokio::spawn(drive(stage, io, driver, link));
    handle.bind_task(task.abort_handle());
}

async fn drive(stage: Box<dyn Stage>, io: StageIo, handle: StageHandle, link: Option<LinkGuard>) {
    handle.set_state(StageState::Active);
    let capabilities = handle.capabilities();

    match stage.run(io).await {
        Ok(()) => {
            handle.set_state(StageState::Ended);
            if let Some(link) = &link {
                link.done.store(true, Ordering::Release);
            }
            tracing::debug!("Stage '{}' completed", handle.name());
            if capabilities.can_write {
                handle.events().emit(&StageEvent::Finish);
            }
            if capabilities.can_read {
                handle.events().emit(&StageEvent::End);
            }
        }
        Err(e) => {
            handle.set_state(StageState::Errored);
            tracing::debug!("Stage '{}' failed: {}", handle.name(), e);
            // 先回報錯誤，下游才會看到通道關閉
            handle.events().emit(&StageEvent::Error(Arc::new(e)));
        }
    }
    drop(link);
}
