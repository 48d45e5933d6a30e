use image::DynamicImage;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, mpsc, oneshot};

use super::{BoxFuture, RenderCallback, RenderDebouncer, RenderError, SourceError};

/// What a single tick puts on screen.
///
/// Missing devices are debounced like values, so a device that stays away
/// renders its placeholder once.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<V> {
    Value(V),
    Missing(String),
}

/// A source of change notifications that replaces fixed-interval sleeping.
pub trait ChangeStream: Send {
    /// Wait for the next change. Returns false once the stream has ended.
    fn changed(&mut self) -> BoxFuture<'_, bool>;
}

impl ChangeStream for mpsc::UnboundedReceiver<()> {
    fn changed(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.recv().await.is_some() })
    }
}

/// What wakes the loop up for its next tick.
pub enum Trigger {
    /// Sleep for a fixed period between ticks
    Interval(Duration),
    /// Tick whenever the backend reports a change
    Changes(Box<dyn ChangeStream>),
}

impl Trigger {
    async fn next(&mut self) -> bool {
        match self {
            Trigger::Interval(period) => {
                tokio::time::sleep(*period).await;
                true
            }
            Trigger::Changes(stream) => stream.changed().await,
        }
    }
}

/// The per-module part of a polling loop: read state, draw it.
pub trait Widget: Send + 'static {
    /// Semantic value compared by the debouncer
    type Value: Clone + PartialEq + fmt::Debug + Send;

    /// Short label used in log messages
    fn name(&self) -> &str;

    /// Set up the tick source. Called once the loop holds its run guard.
    fn trigger(&mut self) -> impl Future<Output = Result<Trigger, SourceError>> + Send;

    /// Read the current state from the backend
    fn query(&mut self) -> impl Future<Output = Result<Self::Value, SourceError>> + Send;

    fn render(&self, value: &Self::Value) -> Result<DynamicImage, RenderError>;

    /// Placeholder shown while the selected device cannot be found
    fn render_missing(&self, reason: &str) -> Result<DynamicImage, RenderError>;
}

/// Pause before setting up updates again after the backend dropped them
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

enum Wake {
    Tick,
    Cancelled,
    Ended,
}

/// Background loop driving one widget until cancelled.
pub struct PollingLoop<W: Widget> {
    widget: W,
    guard: Arc<Semaphore>,
    cancel: oneshot::Receiver<()>,
    refresh: Arc<Notify>,
    callback: RenderCallback,
    debouncer: RenderDebouncer<Frame<W::Value>>,
    retry_delay: Duration,
}

impl<W: Widget> PollingLoop<W> {
    pub fn new(
        widget: W,
        guard: Arc<Semaphore>,
        cancel: oneshot::Receiver<()>,
        refresh: Arc<Notify>,
        callback: RenderCallback,
    ) -> Self {
        Self {
            widget,
            guard,
            cancel,
            refresh,
            callback,
            debouncer: RenderDebouncer::new(),
            retry_delay: RESUBSCRIBE_DELAY,
        }
    }

    /// Run until the cancellation signal fires (or its sender is dropped).
    ///
    /// The run guard is held for the whole body, so a restarted handler
    /// waits here until its previous loop has returned.
    pub async fn run(mut self) {
        let name = self.widget.name().to_string();

        let _permit = tokio::select! {
            biased;
            _ = &mut self.cancel => {
                log::debug!("{}: stopped before acquiring run guard", name);
                return;
            }
            permit = self.guard.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let mut trigger = tokio::select! {
            biased;
            _ = &mut self.cancel => return,
            trigger = self.widget.trigger() => match trigger {
                Ok(trigger) => trigger,
                Err(e) => {
                    log::error!("{}: failed to set up updates: {}", name, e);
                    return;
                }
            },
        };

        log::debug!("{}: polling loop started", name);

        loop {
            let result = tokio::select! {
                biased;
                _ = &mut self.cancel => break,
                result = self.widget.query() => result,
            };
            self.tick(&name, result);

            let wake = tokio::select! {
                biased;
                _ = &mut self.cancel => Wake::Cancelled,
                _ = self.refresh.notified() => {
                    self.debouncer.reset();
                    Wake::Tick
                }
                more = trigger.next() => if more { Wake::Tick } else { Wake::Ended },
            };

            match wake {
                Wake::Tick => continue,
                Wake::Cancelled => break,
                Wake::Ended => {
                    log::warn!("{}: update stream ended, subscribing again", name);
                    match self.resubscribe(&name).await {
                        Some(renewed) => trigger = renewed,
                        None => break,
                    }
                }
            }
        }

        log::debug!("{}: polling loop stopped", name);
    }

    /// Set the tick source up again, retrying until it works.
    /// Returns `None` once cancelled.
    async fn resubscribe(&mut self, name: &str) -> Option<Trigger> {
        loop {
            tokio::select! {
                biased;
                _ = &mut self.cancel => return None,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = &mut self.cancel => return None,
                result = self.widget.trigger() => result,
            };
            match result {
                Ok(trigger) => return Some(trigger),
                Err(e) => log::warn!("{}: failed to set up updates: {}", name, e),
            }
        }
    }

    fn tick(&mut self, name: &str, result: Result<W::Value, SourceError>) {
        let frame = match result {
            Ok(value) => Frame::Value(value),
            Err(SourceError::DeviceNotFound(reason)) => Frame::Missing(reason),
            Err(e) => {
                log::warn!("{}: {}", name, e);
                return;
            }
        };

        if !self.debouncer.should_render(&frame) {
            return;
        }

        let image = match &frame {
            Frame::Value(value) => {
                log::debug!("{}: rendering {:?}", name, value);
                self.widget.render(value)
            }
            Frame::Missing(reason) => {
                log::warn!("{}: {}", name, reason);
                self.widget.render_missing(reason)
            }
        };

        match image {
            Ok(image) => (self.callback)(image),
            Err(e) => log::warn!("{}: skipping frame: {}", name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const MISSING_MARKER: u8 = 255;

    /// Widget whose query results are fed through a channel.
    /// Each frame is a 1x1 image whose red channel carries the value.
    struct Scripted {
        script: mpsc::UnboundedReceiver<Result<u8, SourceError>>,
        changes: Option<mpsc::UnboundedReceiver<()>>,
        interval: Duration,
    }

    impl Widget for Scripted {
        type Value = u8;

        fn name(&self) -> &str {
            "scripted"
        }

        async fn trigger(&mut self) -> Result<Trigger, SourceError> {
            Ok(match self.changes.take() {
                Some(changes) => Trigger::Changes(Box::new(changes)),
                None => Trigger::Interval(self.interval),
            })
        }

        async fn query(&mut self) -> Result<u8, SourceError> {
            match self.script.recv().await {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        fn render(&self, value: &u8) -> Result<DynamicImage, RenderError> {
            Ok(marker(*value))
        }

        fn render_missing(&self, _reason: &str) -> Result<DynamicImage, RenderError> {
            Ok(marker(MISSING_MARKER))
        }
    }

    fn marker(value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([value, 0, 0, 255])))
    }

    struct Harness {
        script: mpsc::UnboundedSender<Result<u8, SourceError>>,
        frames: mpsc::UnboundedReceiver<u8>,
        cancel: Option<oneshot::Sender<()>>,
        refresh: Arc<Notify>,
        handle: JoinHandle<()>,
    }

    fn spawn(
        guard: Arc<Semaphore>,
        interval: Duration,
        changes: Option<mpsc::UnboundedReceiver<()>>,
    ) -> Harness {
        let (script_tx, script_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let refresh = Arc::new(Notify::new());

        let callback: RenderCallback = Arc::new(move |image: DynamicImage| {
            let _ = frame_tx.send(image.to_rgba8().get_pixel(0, 0)[0]);
        });
        let widget = Scripted {
            script: script_rx,
            changes,
            interval,
        };
        let mut polling = PollingLoop::new(widget, guard, cancel_rx, refresh.clone(), callback);
        polling.retry_delay = Duration::from_millis(10);
        let handle = tokio::spawn(polling.run());

        Harness {
            script: script_tx,
            frames: frame_rx,
            cancel: Some(cancel_tx),
            refresh,
            handle,
        }
    }

    impl Harness {
        fn feed(&self, results: impl IntoIterator<Item = Result<u8, SourceError>>) {
            for result in results {
                self.script.send(result).unwrap();
            }
        }

        async fn next_frame(&mut self) -> Option<u8> {
            timeout(Duration::from_secs(2), self.frames.recv())
                .await
                .ok()
                .flatten()
        }

        async fn no_frame(&mut self) -> bool {
            timeout(Duration::from_millis(100), self.frames.recv())
                .await
                .is_err()
        }

        fn cancel(&mut self) {
            let _ = self.cancel.take().unwrap().send(());
        }
    }

    fn guard() -> Arc<Semaphore> {
        Arc::new(Semaphore::new(1))
    }

    #[tokio::test]
    async fn test_renders_first_value_and_each_change() {
        let mut h = spawn(guard(), Duration::ZERO, None);
        h.feed([Ok(1), Ok(1), Ok(2), Ok(2), Ok(2), Ok(3)]);

        assert_eq!(h.next_frame().await, Some(1));
        assert_eq!(h.next_frame().await, Some(2));
        assert_eq!(h.next_frame().await, Some(3));
        assert!(h.no_frame().await);
    }

    #[tokio::test]
    async fn test_query_error_skips_tick() {
        let mut h = spawn(guard(), Duration::ZERO, None);
        h.feed([Err(SourceError::Query("bus timeout".into())), Ok(5), Ok(5)]);

        assert_eq!(h.next_frame().await, Some(5));
        assert!(h.no_frame().await);
    }

    #[tokio::test]
    async fn test_missing_device_renders_placeholder_once() {
        let mut h = spawn(guard(), Duration::ZERO, None);
        h.feed([
            Err(SourceError::DeviceNotFound("Could not find sink input".into())),
            Err(SourceError::DeviceNotFound("Could not find sink input".into())),
            Ok(4),
        ]);

        assert_eq!(h.next_frame().await, Some(MISSING_MARKER));
        assert_eq!(h.next_frame().await, Some(4));
        assert!(h.no_frame().await);
    }

    #[tokio::test]
    async fn test_refresh_rerenders_unchanged_value() {
        let mut h = spawn(guard(), Duration::from_millis(20), None);
        h.feed([Ok(7)]);
        assert_eq!(h.next_frame().await, Some(7));

        h.refresh.notify_one();
        h.feed([Ok(7)]);
        assert_eq!(h.next_frame().await, Some(7));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let mut h = spawn(guard(), Duration::from_secs(60), None);
        h.feed([Ok(1)]);
        assert_eq!(h.next_frame().await, Some(1));

        h.cancel();
        assert!(timeout(Duration::from_millis(500), h.handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_stops_loop() {
        let mut h = spawn(guard(), Duration::from_secs(60), None);
        h.feed([Ok(1)]);
        assert_eq!(h.next_frame().await, Some(1));

        drop(h.cancel.take());
        assert!(timeout(Duration::from_millis(500), h.handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_stream_drives_ticks() {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let mut h = spawn(guard(), Duration::from_secs(60), Some(changes_rx));

        // Initial tick happens without a change notification
        h.feed([Ok(10)]);
        assert_eq!(h.next_frame().await, Some(10));

        h.feed([Ok(11)]);
        assert!(h.no_frame().await);
        changes_tx.send(()).unwrap();
        assert_eq!(h.next_frame().await, Some(11));
    }

    #[tokio::test]
    async fn test_ended_change_stream_is_resubscribed() {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let mut h = spawn(guard(), Duration::from_secs(60), Some(changes_rx));
        h.feed([Ok(10)]);
        assert_eq!(h.next_frame().await, Some(10));

        // The backend goes away; the loop sets up its updates again and
        // reads the state it missed
        drop(changes_tx);
        h.feed([Ok(12)]);
        assert_eq!(h.next_frame().await, Some(12));
        assert!(!h.handle.is_finished());

        h.cancel();
        assert!(timeout(Duration::from_millis(500), h.handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_resubscribe_wait() {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let mut h = spawn(guard(), Duration::from_secs(60), Some(changes_rx));
        h.feed([Ok(1)]);
        assert_eq!(h.next_frame().await, Some(1));

        drop(changes_tx);
        h.cancel();
        assert!(timeout(Duration::from_millis(500), h.handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_guard_serializes_loops() {
        let shared = guard();
        let mut first = spawn(shared.clone(), Duration::ZERO, None);
        first.feed([Ok(1)]);
        assert_eq!(first.next_frame().await, Some(1));

        let mut second = spawn(shared.clone(), Duration::ZERO, None);
        second.feed([Ok(2)]);
        assert!(second.no_frame().await);

        first.cancel();
        assert_eq!(second.next_frame().await, Some(2));
        assert_eq!(shared.available_permits(), 0);

        second.cancel();
        assert!(timeout(Duration::from_millis(500), second.handle).await.is_ok());
        assert_eq!(shared.available_permits(), 1);
    }
}
