//! Handler runtime: the traits hosts drive, the lifecycle state machine,
//! the polling loop and the render debouncer.

mod debounce;
mod error;
mod lifecycle;
mod polling;

pub use debounce::RenderDebouncer;
pub use error::{HandlerError, RenderError, SourceError};
pub use lifecycle::{Lifecycle, PollingHandler, WidgetFactory};
pub use polling::{ChangeStream, PollingLoop, Trigger, Widget};

use common::{HandlerConfig, HostInfo, InputEvent};
use image::DynamicImage;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Host-supplied sink for rendered frames.
///
/// Called from the handler's own background task, one frame at a time.
pub type RenderCallback = Arc<dyn Fn(DynamicImage) + Send + Sync>;

/// Boxed future returned by the dyn-compatible input traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An icon or LCD handler that renders state in the background.
pub trait DisplayHandler: Send {
    /// Validate `config`, resolve one-time resources and begin rendering.
    ///
    /// Returns without waiting for the first frame.
    fn start(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
        callback: RenderCallback,
    ) -> Result<(), HandlerError>;

    /// Stop rendering. Only meaningful while running.
    fn stop(&mut self);

    /// Host bookkeeping label, decoupled from the actual loop state
    fn is_running(&self) -> bool;

    fn set_running(&mut self, running: bool);

    /// What a key handler bound to the same control may look at
    fn view(&self) -> IconView {
        IconView::default()
    }

    /// Background tasks not yet handed out, awaited by the host on shutdown
    fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

/// Snapshot of a display handler handed to the key handler on the same key.
#[derive(Debug, Clone, Default)]
pub struct IconView {
    /// Module name of the icon handler, if any
    pub module: Option<String>,
    /// Last rendered on/off status, for status-style icons
    pub status: Option<bool>,
    /// Wakes the icon's polling loop for an immediate, undebounced render
    pub refresh: Option<Arc<Notify>>,
}

/// Context for a key press.
pub struct KeyContext<'a> {
    pub config: &'a HandlerConfig,
    pub info: &'a HostInfo,
    pub icon: IconView,
}

/// Handles a key press to completion on the caller's task.
pub trait KeyHandler: Send + Sync {
    fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// Handles knob turns, knob presses and touch strip events.
///
/// Each call resolves its device afresh and never leaves work behind.
pub trait KnobHandler: Send + Sync {
    fn input<'a>(
        &'a self,
        config: &'a HandlerConfig,
        info: &'a HostInfo,
        event: InputEvent,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}
