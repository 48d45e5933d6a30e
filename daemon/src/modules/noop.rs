use common::{HandlerConfig, HostInfo, ModuleInfo};

use crate::compositor::Compositor;
use crate::handler::{DisplayHandler, HandlerError, Lifecycle, RenderCallback};

pub const NAME: &str = "NoOp";

pub fn info() -> ModuleInfo {
    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: None,
        key_fields: None,
        lcd_fields: None,
        knob_fields: None,
    }
}

/// Icon handler that clears its key once and does nothing else.
#[derive(Default)]
pub struct NoOpIcon {
    lifecycle: Lifecycle,
}

impl NoOpIcon {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplayHandler for NoOpIcon {
    fn start(
        &mut self,
        _config: &HandlerConfig,
        info: &HostInfo,
        callback: RenderCallback,
    ) -> Result<(), HandlerError> {
        if self.lifecycle.label() {
            callback(Compositor::blank(info.icon_size, info.icon_size));
        }
        self.lifecycle.mark_running();
        Ok(())
    }

    fn stop(&mut self) {
        self.lifecycle.stop();
    }

    fn is_running(&self) -> bool {
        self.lifecycle.label()
    }

    fn set_running(&mut self, running: bool) {
        self.lifecycle.set_label(running);
    }
}
