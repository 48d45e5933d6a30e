//! Icon showing whether a shell check passes, and a key flipping it.

use common::{Field, HandlerConfig, HostInfo, ModuleInfo};
use image::DynamicImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{IMAGE_TYPES, load_image_or_blank, required};
use crate::compositor::Compositor;
use crate::handler::{
    BoxFuture, HandlerError, KeyContext, KeyHandler, RenderError, SourceError, Trigger, Widget,
    WidgetFactory,
};
use crate::source::shell::{self, ShellCheck};

pub const NAME: &str = "Toggle";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn info() -> ModuleInfo {
    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: Some(vec![
            Field::file("Up Icon", "up_icon", IMAGE_TYPES),
            Field::file("Down Icon", "down_icon", IMAGE_TYPES),
            Field::text("Check Command", "check_command"),
        ]),
        key_fields: Some(vec![
            Field::text("Up Command", "up_command"),
            Field::text("Down Command", "down_command"),
        ]),
        lcd_fields: None,
        knob_fields: None,
    }
}

pub struct ToggleFactory {
    compositor: Compositor,
    status: Arc<AtomicBool>,
    interval: Duration,
}

impl ToggleFactory {
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            status: Arc::new(AtomicBool::new(false)),
            interval: POLL_INTERVAL,
        }
    }
}

impl WidgetFactory for ToggleFactory {
    type Widget = ToggleWidget;

    fn module(&self) -> &'static str {
        NAME
    }

    fn build(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
    ) -> Result<ToggleWidget, HandlerError> {
        let check = ShellCheck::new(required(config, "check_command")?);
        let size = info.icon_size;

        Ok(ToggleWidget {
            check,
            up: load_image_or_blank(&self.compositor, config, "up_icon", size, size),
            down: load_image_or_blank(&self.compositor, config, "down_icon", size, size),
            compositor: self.compositor.clone(),
            size,
            status: self.status.clone(),
            interval: self.interval,
        })
    }

    fn status(&self) -> Option<bool> {
        Some(self.status.load(Ordering::Relaxed))
    }
}

pub struct ToggleWidget {
    check: ShellCheck,
    up: DynamicImage,
    down: DynamicImage,
    compositor: Compositor,
    size: u32,
    status: Arc<AtomicBool>,
    interval: Duration,
}

impl Widget for ToggleWidget {
    type Value = bool;

    fn name(&self) -> &str {
        NAME
    }

    async fn trigger(&mut self) -> Result<Trigger, SourceError> {
        Ok(Trigger::Interval(self.interval))
    }

    async fn query(&mut self) -> Result<bool, SourceError> {
        let status = self.check.status().await?;
        self.status.store(status, Ordering::Relaxed);
        Ok(status)
    }

    fn render(&self, up: &bool) -> Result<DynamicImage, RenderError> {
        Ok(if *up { self.up.clone() } else { self.down.clone() })
    }

    fn render_missing(&self, reason: &str) -> Result<DynamicImage, RenderError> {
        self.compositor.placeholder(self.size, self.size, reason)
    }
}

/// Runs `down_command` while the key's Toggle icon shows up, else `up_command`.
pub struct ToggleKey;

impl KeyHandler for ToggleKey {
    fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            if ctx.icon.module.as_deref() != Some(NAME) {
                return Ok(());
            }

            let field = if ctx.icon.status.unwrap_or(false) {
                "down_command"
            } else {
                "up_command"
            };
            let Some(command) = ctx.config.text(field) else {
                return Ok(());
            };

            log::debug!("Toggle: running {}", field);
            shell::spawn_detached(command)?;
            Ok(())
        })
    }
}
