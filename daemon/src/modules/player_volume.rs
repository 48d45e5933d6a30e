//! LCD showing a media player's volume over its album art, plus a knob
//! adjusting it.

use common::{Field, HandlerConfig, HostInfo, InputEvent, ModuleInfo};
use image::DynamicImage;
use std::path::Path;
use std::time::Duration;

use super::{IMAGE_TYPES, LABEL_FONT_SIZE, load_image, stepped_volume, turn_steps};
use crate::compositor::{Anchor, Compositor};
use crate::handler::{
    BoxFuture, HandlerError, KnobHandler, RenderError, SourceError, Trigger, Widget,
    WidgetFactory,
};
use crate::source::mpris::MediaBus;
use crate::source::{Selector, http, percent};

pub const NAME: &str = "PlayerCtlVolume";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn info() -> ModuleInfo {
    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: None,
        key_fields: None,
        lcd_fields: Some(vec![
            Field::file("Icon", "icon", IMAGE_TYPES),
            Field::text("Player Name", "player_name"),
        ]),
        knob_fields: Some(vec![Field::text("Player Name", "player_name")]),
    }
}

/// Where an MPRIS art URL points
#[derive(Debug, PartialEq, Eq)]
enum ArtSource<'a> {
    Remote(&'a str),
    Local(&'a Path),
}

fn art_source(url: &str) -> Option<ArtSource<'_>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(ArtSource::Remote(url))
    } else if let Some(path) = url.strip_prefix("file://") {
        Some(ArtSource::Local(Path::new(path)))
    } else if url.starts_with('/') {
        Some(ArtSource::Local(Path::new(url)))
    } else {
        None
    }
}

/// What the LCD shows for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerFrame {
    pub player: String,
    pub art_url: Option<String>,
    pub percent: u32,
}

/// Draws frames; independent of the bus so it can be exercised directly.
struct Face {
    compositor: Compositor,
    icon: Option<DynamicImage>,
    width: u32,
    height: u32,
}

impl Face {
    /// Configured icon first, then album art, then the player's name
    fn render(
        &self,
        frame: &PlayerFrame,
        art: Option<&DynamicImage>,
    ) -> Result<DynamicImage, RenderError> {
        let base = match (&self.icon, art) {
            (Some(icon), _) => icon.clone(),
            (None, Some(art)) => art.clone(),
            (None, None) => self.compositor.overlay(
                &Compositor::blank(self.width, self.height),
                &frame.player,
                0.0,
                Anchor::Middle,
            )?,
        };

        let label = format!("{}%", frame.percent);
        self.compositor
            .overlay(&base, &label, LABEL_FONT_SIZE, Anchor::Bottom)
    }
}

pub struct PlayerVolumeFactory {
    bus: MediaBus,
    client: reqwest::Client,
    compositor: Compositor,
}

impl PlayerVolumeFactory {
    pub fn new(bus: MediaBus, client: reqwest::Client, compositor: Compositor) -> Self {
        Self {
            bus,
            client,
            compositor,
        }
    }
}

impl WidgetFactory for PlayerVolumeFactory {
    type Widget = PlayerVolumeWidget;

    fn module(&self) -> &'static str {
        NAME
    }

    fn build(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
    ) -> Result<PlayerVolumeWidget, HandlerError> {
        let (width, height) = (info.lcd_width, info.lcd_height);
        let icon = config
            .text("icon")
            .and_then(|_| load_image(&self.compositor, config, "icon", width, height));

        Ok(PlayerVolumeWidget {
            bus: self.bus.clone(),
            client: self.client.clone(),
            selector: Selector::named_or_active(config.text("player_name")),
            face: Face {
                compositor: self.compositor.clone(),
                icon,
                width,
                height,
            },
            art: None,
        })
    }
}

pub struct PlayerVolumeWidget {
    bus: MediaBus,
    client: reqwest::Client,
    selector: Selector,
    face: Face,
    /// Last art URL seen and its image, if it could be loaded
    art: Option<(String, Option<DynamicImage>)>,
}

impl PlayerVolumeWidget {
    async fn load_art(&self, url: &str) -> Option<DynamicImage> {
        let image = match art_source(url)? {
            ArtSource::Remote(url) => match http::fetch(&self.client, url).await {
                Ok(bytes) => Compositor::decode(&bytes),
                Err(e) => {
                    log::debug!("{}: album art unavailable: {}", NAME, e);
                    return None;
                }
            },
            ArtSource::Local(path) => Compositor::open(path),
        };

        match image.and_then(|img| {
            self.face
                .compositor
                .resize(&img, self.face.width, self.face.height)
        }) {
            Ok(img) => Some(img),
            Err(e) => {
                log::debug!("{}: album art unusable: {}", NAME, e);
                None
            }
        }
    }

    async fn cache_art(&mut self, url: &str) {
        if self.art.as_ref().is_some_and(|(cached, _)| cached == url) {
            return;
        }
        let image = self.load_art(url).await;
        self.art = Some((url.to_string(), image));
    }

    fn cached_art(&self, url: Option<&str>) -> Option<&DynamicImage> {
        let (cached, image) = self.art.as_ref()?;
        if Some(cached.as_str()) != url {
            return None;
        }
        image.as_ref()
    }
}

impl Widget for PlayerVolumeWidget {
    type Value = PlayerFrame;

    fn name(&self) -> &str {
        NAME
    }

    async fn trigger(&mut self) -> Result<Trigger, SourceError> {
        Ok(Trigger::Interval(POLL_INTERVAL))
    }

    async fn query(&mut self) -> Result<PlayerFrame, SourceError> {
        let player = self.bus.select(&self.selector, true).await?;
        let volume = player.volume().await?;

        let art_url = if self.face.icon.is_some() {
            None
        } else {
            player.art_url().await.unwrap_or_else(|e| {
                log::debug!("{}: {}", NAME, e);
                None
            })
        };
        if let Some(url) = &art_url {
            self.cache_art(url).await;
        }

        Ok(PlayerFrame {
            player: player.short_name().to_string(),
            art_url,
            percent: percent(volume),
        })
    }

    fn render(&self, frame: &PlayerFrame) -> Result<DynamicImage, RenderError> {
        self.face
            .render(frame, self.cached_art(frame.art_url.as_deref()))
    }

    fn render_missing(&self, reason: &str) -> Result<DynamicImage, RenderError> {
        self.face
            .compositor
            .placeholder(self.face.width, self.face.height, reason)
    }
}

/// Turns change the selected player's volume by one percent per detent.
pub struct PlayerVolumeKnob {
    bus: MediaBus,
}

impl PlayerVolumeKnob {
    pub fn new(bus: MediaBus) -> Self {
        Self { bus }
    }
}

impl KnobHandler for PlayerVolumeKnob {
    fn input<'a>(
        &'a self,
        config: &'a HandlerConfig,
        _info: &'a HostInfo,
        event: InputEvent,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let Some(steps) = turn_steps(&event) else {
                return Ok(());
            };

            let selector = Selector::named_or_active(config.text("player_name"));
            let player = self.bus.select(&selector, true).await?;
            let current = player.volume().await?;
            let target = stepped_volume(current, steps);

            log::debug!(
                "{}: {} volume {}% -> {}%",
                NAME,
                player.short_name(),
                percent(current),
                percent(target)
            );
            player.set_volume(target).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn face(icon: Option<DynamicImage>) -> Face {
        Face {
            compositor: Compositor::without_font(),
            icon,
            width: 20,
            height: 10,
        }
    }

    fn solid(color: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 10, Rgba(color)))
    }

    fn frame(percent: u32) -> PlayerFrame {
        PlayerFrame {
            player: "spotify".to_string(),
            art_url: None,
            percent,
        }
    }

    #[test]
    fn test_art_source() {
        assert_eq!(
            art_source("https://i.scdn.co/image/ab67"),
            Some(ArtSource::Remote("https://i.scdn.co/image/ab67"))
        );
        assert_eq!(
            art_source("file:///tmp/cover.png"),
            Some(ArtSource::Local(Path::new("/tmp/cover.png")))
        );
        assert_eq!(
            art_source("/home/me/cover.jpg"),
            Some(ArtSource::Local(Path::new("/home/me/cover.jpg")))
        );
        assert_eq!(art_source("data:image/png;base64,AAAA"), None);
    }

    #[test]
    fn test_icon_takes_precedence_over_art() {
        let face = face(Some(solid([1, 2, 3, 255])));
        let art = solid([200, 0, 0, 255]);
        let img = face.render(&frame(40), Some(&art)).unwrap();
        assert_eq!(img.to_rgba8().get_pixel(0, 0).0, [1, 2, 3, 255]);
    }

    #[test]
    fn test_art_then_blank_fallback() {
        let face = face(None);
        let art = solid([200, 0, 0, 255]);

        let with_art = face.render(&frame(40), Some(&art)).unwrap();
        assert_eq!(with_art.to_rgba8().get_pixel(0, 0).0, [200, 0, 0, 255]);

        let without = face.render(&frame(40), None).unwrap();
        assert_eq!((without.width(), without.height()), (20, 10));
        assert_eq!(without.to_rgba8().get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_frames_compare_on_rounded_percent() {
        let a = PlayerFrame {
            percent: percent(0.501),
            ..frame(0)
        };
        let b = PlayerFrame {
            percent: percent(0.499),
            ..frame(0)
        };
        assert_eq!(a, b);
    }
}
