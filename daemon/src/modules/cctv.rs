//! Camera snapshot icon, refreshed from an HTTP URL.

use common::{Field, HandlerConfig, HostInfo, ModuleInfo};
use image::DynamicImage;
use std::time::Duration;

use super::required;
use crate::compositor::Compositor;
use crate::handler::{
    BoxFuture, HandlerError, KeyContext, KeyHandler, RenderError, SourceError, Trigger, Widget,
    WidgetFactory,
};
use crate::source::http::HttpImage;

pub const NAME: &str = "CCTV";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn info() -> ModuleInfo {
    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: Some(vec![Field::text("URL", "url")]),
        key_fields: None,
        lcd_fields: None,
        knob_fields: None,
    }
}

pub struct CctvFactory {
    client: reqwest::Client,
    compositor: Compositor,
}

impl CctvFactory {
    pub fn new(client: reqwest::Client, compositor: Compositor) -> Self {
        Self { client, compositor }
    }
}

impl WidgetFactory for CctvFactory {
    type Widget = CctvWidget;

    fn module(&self) -> &'static str {
        NAME
    }

    fn build(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
    ) -> Result<CctvWidget, HandlerError> {
        let url = required(config, "url")?;
        Ok(CctvWidget {
            source: HttpImage::new(self.client.clone(), url),
            compositor: self.compositor.clone(),
            size: info.icon_size,
        })
    }
}

pub struct CctvWidget {
    source: HttpImage,
    compositor: Compositor,
    size: u32,
}

impl Widget for CctvWidget {
    /// Encoded snapshot, compared byte for byte
    type Value = Vec<u8>;

    fn name(&self) -> &str {
        NAME
    }

    async fn trigger(&mut self) -> Result<Trigger, SourceError> {
        Ok(Trigger::Interval(POLL_INTERVAL))
    }

    async fn query(&mut self) -> Result<Vec<u8>, SourceError> {
        self.source.fetch().await
    }

    fn render(&self, snapshot: &Vec<u8>) -> Result<DynamicImage, RenderError> {
        let image = Compositor::decode(snapshot)?;
        self.compositor.resize(&image, self.size, self.size)
    }

    fn render_missing(&self, reason: &str) -> Result<DynamicImage, RenderError> {
        self.compositor.placeholder(self.size, self.size, reason)
    }
}

/// Fetches a new snapshot right away for the key's CCTV icon.
pub struct CctvKey;

impl KeyHandler for CctvKey {
    fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            if ctx.icon.module.as_deref() != Some(NAME) {
                return Ok(());
            }
            if let Some(refresh) = ctx.icon.refresh {
                refresh.notify_one();
            }
            Ok(())
        })
    }
}
