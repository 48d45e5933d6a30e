use common::{HandlerConfig, HostInfo};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinHandle;

use super::{DisplayHandler, HandlerError, IconView, PollingLoop, RenderCallback, Widget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Stopped,
}

/// Per-instance run state shared by every display handler.
///
/// Owns the run guard, the cancellation sender for the current loop and the
/// refresh trigger. The `running` label is host bookkeeping only and never
/// starts or stops anything.
pub struct Lifecycle {
    state: RunState,
    running: bool,
    guard: Arc<Semaphore>,
    cancel: Option<oneshot::Sender<()>>,
    refresh: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RunState::NotStarted,
            running: true,
            guard: Arc::new(Semaphore::new(1)),
            cancel: None,
            refresh: Arc::new(Notify::new()),
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn label(&self) -> bool {
        self.running
    }

    pub fn set_label(&mut self, running: bool) {
        self.running = running;
    }

    pub fn refresh(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    /// Spawn a polling loop for `widget` and move to `Running`.
    ///
    /// A loop left over from a previous run keeps the guard until it exits;
    /// the new loop waits for it before its first query.
    pub fn launch<W: Widget>(&mut self, widget: W, callback: RenderCallback) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let polling = PollingLoop::new(
            widget,
            self.guard.clone(),
            cancel_rx,
            self.refresh.clone(),
            callback,
        );

        self.cancel = Some(cancel_tx);
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(tokio::spawn(polling.run()));
        self.state = RunState::Running;
    }

    /// Move to `Running` for handlers that do their work inside `start`.
    pub fn mark_running(&mut self) {
        self.cancel = None;
        self.state = RunState::Running;
    }

    /// Signal the current loop to exit. Returns false if nothing was running.
    pub fn stop(&mut self) -> bool {
        if self.state != RunState::Running {
            log::warn!("Stop requested while {:?}, ignoring", self.state);
            return false;
        }

        if let Some(cancel) = self.cancel.take() {
            // The loop may already have exited on its own (ended change stream)
            let _ = cancel.send(());
        }
        self.state = RunState::Stopped;
        true
    }

    /// Hand out the loops that may still be running, including ones a
    /// restart left to wind down
    pub fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.tasks)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a fresh widget for every `start`, holding whatever backends the
/// module shares between instances.
pub trait WidgetFactory: Send + 'static {
    type Widget: Widget;

    /// Module name reported to key handlers on the same control
    fn module(&self) -> &'static str;

    /// Validate `config` and resolve one-time resources.
    fn build(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
    ) -> Result<Self::Widget, HandlerError>;

    /// Last known on/off status, for modules that have one
    fn status(&self) -> Option<bool> {
        None
    }
}

/// Display handler that renders a widget from a background polling loop.
pub struct PollingHandler<F: WidgetFactory> {
    factory: F,
    lifecycle: Lifecycle,
}

impl<F: WidgetFactory> PollingHandler<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            lifecycle: Lifecycle::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }
}

impl<F: WidgetFactory> DisplayHandler for PollingHandler<F> {
    fn start(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
        callback: RenderCallback,
    ) -> Result<(), HandlerError> {
        if self.lifecycle.is_active() {
            log::info!("{}: already running", self.factory.module());
            return Ok(());
        }

        let widget = self.factory.build(config, info)?;
        log::debug!(
            "{}: starting ({:?} -> Running)",
            self.factory.module(),
            self.lifecycle.state()
        );
        self.lifecycle.launch(widget, callback);
        Ok(())
    }

    fn stop(&mut self) {
        if self.lifecycle.stop() {
            log::debug!("{}: stopped", self.factory.module());
        }
    }

    fn is_running(&self) -> bool {
        self.lifecycle.label()
    }

    fn set_running(&mut self, running: bool) {
        self.lifecycle.set_label(running);
    }

    fn view(&self) -> IconView {
        IconView {
            module: Some(self.factory.module().to_string()),
            status: self.factory.status(),
            refresh: Some(self.lifecycle.refresh()),
        }
    }

    fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        self.lifecycle.take_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{RenderError, SourceError, Trigger};
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[derive(Default)]
    struct Probe {
        active: AtomicUsize,
        max_active: AtomicUsize,
        queries: AtomicUsize,
    }

    struct ActiveQuery<'a>(&'a Probe);

    impl<'a> ActiveQuery<'a> {
        fn enter(probe: &'a Probe) -> Self {
            let now = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_active.fetch_max(now, Ordering::SeqCst);
            Self(probe)
        }
    }

    impl Drop for ActiveQuery<'_> {
        fn drop(&mut self) {
            self.0.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct Counter {
        probe: Arc<Probe>,
        interval: Duration,
    }

    impl Widget for Counter {
        type Value = usize;

        fn name(&self) -> &str {
            "counter"
        }

        async fn trigger(&mut self) -> Result<Trigger, SourceError> {
            Ok(Trigger::Interval(self.interval))
        }

        async fn query(&mut self) -> Result<usize, SourceError> {
            let _active = ActiveQuery::enter(&self.probe);
            sleep(Duration::from_millis(2)).await;
            Ok(self.probe.queries.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn render(&self, _value: &usize) -> Result<DynamicImage, RenderError> {
            Ok(DynamicImage::new_rgba8(1, 1))
        }

        fn render_missing(&self, _reason: &str) -> Result<DynamicImage, RenderError> {
            Ok(DynamicImage::new_rgba8(1, 1))
        }
    }

    struct CounterFactory {
        probe: Arc<Probe>,
        interval: Duration,
    }

    impl WidgetFactory for CounterFactory {
        type Widget = Counter;

        fn module(&self) -> &'static str {
            "Counter"
        }

        fn build(
            &mut self,
            config: &HandlerConfig,
            _info: &HostInfo,
        ) -> Result<Counter, HandlerError> {
            config.text("name").ok_or(HandlerError::MissingField("name"))?;
            Ok(Counter {
                probe: self.probe.clone(),
                interval: self.interval,
            })
        }
    }

    fn handler(interval: Duration) -> (PollingHandler<CounterFactory>, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let factory = CounterFactory {
            probe: probe.clone(),
            interval,
        };
        (PollingHandler::new(factory), probe)
    }

    fn config() -> HandlerConfig {
        HandlerConfig::new().with_text("name", "test")
    }

    fn frames() -> (RenderCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let callback: RenderCallback = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    #[tokio::test]
    async fn test_starts_running_with_label_set() {
        let (mut handler, _) = handler(Duration::from_millis(1));
        assert_eq!(handler.state(), RunState::NotStarted);
        assert!(handler.is_running());

        let (callback, count) = frames();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        assert_eq!(handler.state(), RunState::Running);

        sleep(Duration::from_millis(50)).await;
        assert!(count.load(Ordering::SeqCst) > 0);
        handler.stop();
    }

    #[tokio::test]
    async fn test_missing_field_keeps_not_started() {
        let (mut handler, probe) = handler(Duration::from_millis(1));
        let (callback, _) = frames();

        let err = handler
            .start(&HandlerConfig::new(), &HostInfo::default(), callback)
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingField("name")));
        assert_eq!(handler.state(), RunState::NotStarted);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let (mut handler, probe) = handler(Duration::from_millis(1));
        let (callback, _) = frames();

        handler.start(&config(), &HostInfo::default(), callback.clone()).unwrap();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
        handler.stop();
    }

    #[tokio::test]
    async fn test_stop_ends_loop_within_interval() {
        let interval = Duration::from_millis(100);
        let (mut handler, probe) = handler(interval);
        let (callback, _) = frames();

        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        sleep(Duration::from_millis(20)).await;
        let task = handler.take_tasks().pop().unwrap();

        handler.stop();
        assert_eq!(handler.state(), RunState::Stopped);
        assert!(timeout(interval, task).await.is_ok());

        let queries = probe.queries.load(Ordering::SeqCst);
        sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.queries.load(Ordering::SeqCst), queries);
    }

    #[tokio::test]
    async fn test_stop_when_not_running_is_harmless() {
        let (mut handler, _) = handler(Duration::from_millis(1));
        handler.stop();
        assert_eq!(handler.state(), RunState::NotStarted);

        let (callback, _) = frames();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        handler.stop();
        handler.stop();
        assert_eq!(handler.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_never_overlaps_loops() {
        let (mut handler, probe) = handler(Duration::ZERO);

        for _ in 0..5 {
            let (callback, _) = frames();
            handler.start(&config(), &HostInfo::default(), callback).unwrap();
            sleep(Duration::from_millis(10)).await;
            handler.stop();
        }

        let (callback, count) = frames();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
        assert!(count.load(Ordering::SeqCst) > 0);
        handler.stop();
    }

    #[tokio::test]
    async fn test_restart_keeps_exiting_loop_joinable() {
        let (mut handler, _) = handler(Duration::from_millis(1));

        let (callback, _) = frames();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        handler.stop();
        // The first loop has not had a chance to exit yet
        let (callback, _) = frames();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        handler.stop();

        let tasks = handler.take_tasks();
        assert_eq!(tasks.len(), 2);
        for task in tasks {
            assert!(timeout(Duration::from_millis(500), task).await.is_ok());
        }
        assert!(handler.take_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_label_is_decoupled_from_state() {
        let (mut handler, _) = handler(Duration::from_millis(1));
        handler.set_running(false);
        assert!(!handler.is_running());
        assert_eq!(handler.state(), RunState::NotStarted);

        let (callback, _) = frames();
        handler.start(&config(), &HostInfo::default(), callback).unwrap();
        assert!(!handler.is_running());
        assert_eq!(handler.state(), RunState::Running);
        handler.stop();
    }

    #[tokio::test]
    async fn test_view_exposes_refresh() {
        let (handler, _) = handler(Duration::from_millis(1));
        let view = handler.view();
        assert_eq!(view.module.as_deref(), Some("Counter"));
        assert!(view.status.is_none());
        assert!(view.refresh.is_some());
    }
}
