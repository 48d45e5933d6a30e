//! Registry of the handler modules a deck can bind to its controls.

pub mod cctv;
pub mod lights;
pub mod noop;
pub mod player_volume;
pub mod playerctl;
pub mod toggle;
pub mod volume;

use common::{EventType, HandlerConfig, InputEvent, ModuleInfo};
use image::DynamicImage;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::compositor::Compositor;
use crate::handler::{DisplayHandler, HandlerError, KeyHandler, KnobHandler, PollingHandler};
use crate::source::http;
use crate::source::mpris::MediaBus;
use crate::source::pulse::PulseClient;

const IMAGE_TYPES: &[&str] = &[".png", ".jpg", ".jpeg"];

/// Size of the value label drawn along the bottom of LCD segments
const LABEL_FONT_SIZE: f32 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Toggle,
    Cctv,
    NoOp,
    Lights,
    Playerctl,
    PlayerCtlVolume,
    Volume,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 7] = [
        ModuleKind::Toggle,
        ModuleKind::Cctv,
        ModuleKind::NoOp,
        ModuleKind::Lights,
        ModuleKind::Playerctl,
        ModuleKind::PlayerCtlVolume,
        ModuleKind::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Toggle => "Toggle",
            ModuleKind::Cctv => "CCTV",
            ModuleKind::NoOp => "NoOp",
            ModuleKind::Lights => "Lights",
            ModuleKind::Playerctl => "Playerctl",
            ModuleKind::PlayerCtlVolume => "PlayerCtlVolume",
            ModuleKind::Volume => "Volume",
        }
    }

    /// Name and field descriptors advertised to hosts
    pub fn info(self) -> ModuleInfo {
        match self {
            ModuleKind::Toggle => toggle::info(),
            ModuleKind::Cctv => cctv::info(),
            ModuleKind::NoOp => noop::info(),
            ModuleKind::Lights => lights::info(),
            ModuleKind::Playerctl => playerctl::info(),
            ModuleKind::PlayerCtlVolume => player_volume::info(),
            ModuleKind::Volume => volume::info(),
        }
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("Unknown module: {}", s))
    }
}

pub fn module_infos() -> Vec<ModuleInfo> {
    ModuleKind::ALL.into_iter().map(ModuleKind::info).collect()
}

/// Backends shared by every handler the registry creates.
///
/// Bus and audio server connections are opened on first use and reused by
/// all instances of the modules needing them.
pub struct ModuleContext {
    compositor: Compositor,
    http: reqwest::Client,
    media: OnceCell<MediaBus>,
    pulse: OnceCell<PulseClient>,
}

impl ModuleContext {
    pub fn new(compositor: Compositor) -> Result<Self, HandlerError> {
        Ok(Self {
            compositor,
            http: http::client()?,
            media: OnceCell::new(),
            pulse: OnceCell::new(),
        })
    }

    async fn media(&self) -> Result<MediaBus, HandlerError> {
        self.media.get_or_try_init(MediaBus::connect).await.cloned()
    }

    async fn pulse(&self) -> Result<PulseClient, HandlerError> {
        self.pulse.get_or_try_init(PulseClient::connect).await.cloned()
    }

    /// Fresh icon handler, or `None` if the module has no icon handler
    pub async fn icon_handler(
        &self,
        kind: ModuleKind,
    ) -> Result<Option<Box<dyn DisplayHandler>>, HandlerError> {
        let handler: Box<dyn DisplayHandler> = match kind {
            ModuleKind::Toggle => Box::new(PollingHandler::new(toggle::ToggleFactory::new(
                self.compositor.clone(),
            ))),
            ModuleKind::Cctv => Box::new(PollingHandler::new(cctv::CctvFactory::new(
                self.http.clone(),
                self.compositor.clone(),
            ))),
            ModuleKind::NoOp => Box::new(noop::NoOpIcon::new()),
            _ => return Ok(None),
        };
        Ok(Some(handler))
    }

    pub async fn key_handler(
        &self,
        kind: ModuleKind,
    ) -> Result<Option<Arc<dyn KeyHandler>>, HandlerError> {
        let handler: Arc<dyn KeyHandler> = match kind {
            ModuleKind::Toggle => Arc::new(toggle::ToggleKey),
            ModuleKind::Cctv => Arc::new(cctv::CctvKey),
            ModuleKind::Lights => Arc::new(lights::LightsKey::new(self.http.clone())),
            ModuleKind::Playerctl => Arc::new(playerctl::PlayerctlKey::new(self.media().await?)),
            ModuleKind::Volume => Arc::new(volume::VolumeKey::new(self.pulse().await?)),
            _ => return Ok(None),
        };
        Ok(Some(handler))
    }

    pub async fn lcd_handler(
        &self,
        kind: ModuleKind,
    ) -> Result<Option<Box<dyn DisplayHandler>>, HandlerError> {
        let handler: Box<dyn DisplayHandler> = match kind {
            ModuleKind::PlayerCtlVolume => Box::new(PollingHandler::new(
                player_volume::PlayerVolumeFactory::new(
                    self.media().await?,
                    self.http.clone(),
                    self.compositor.clone(),
                ),
            )),
            ModuleKind::Volume => Box::new(PollingHandler::new(volume::VolumeFactory::new(
                self.pulse().await?,
                self.compositor.clone(),
            ))),
            _ => return Ok(None),
        };
        Ok(Some(handler))
    }

    pub async fn knob_handler(
        &self,
        kind: ModuleKind,
    ) -> Result<Option<Arc<dyn KnobHandler>>, HandlerError> {
        let handler: Arc<dyn KnobHandler> = match kind {
            ModuleKind::PlayerCtlVolume => {
                Arc::new(player_volume::PlayerVolumeKnob::new(self.media().await?))
            }
            ModuleKind::Volume => Arc::new(volume::VolumeKnob::new(self.pulse().await?)),
            _ => return Ok(None),
        };
        Ok(Some(handler))
    }
}

fn required<'a>(config: &'a HandlerConfig, field: &'static str) -> Result<&'a str, HandlerError> {
    config.text(field).ok_or(HandlerError::MissingField(field))
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load the image named by `field` and fit it to the given size
fn load_image(
    compositor: &Compositor,
    config: &HandlerConfig,
    field: &str,
    width: u32,
    height: u32,
) -> Option<DynamicImage> {
    let Some(path) = config.text(field) else {
        log::warn!("Image missing: {}", field);
        return None;
    };

    match Compositor::open(&expand_path(path)).and_then(|img| compositor.resize(&img, width, height))
    {
        Ok(img) => Some(img),
        Err(e) => {
            log::warn!("Failed to load {}: {}", field, e);
            None
        }
    }
}

/// Like [`load_image`], with a blank image standing in for a missing one
fn load_image_or_blank(
    compositor: &Compositor,
    config: &HandlerConfig,
    field: &str,
    width: u32,
    height: u32,
) -> DynamicImage {
    load_image(compositor, config, field, width, height)
        .unwrap_or_else(|| Compositor::blank(width, height))
}

/// Signed detent count of a knob turn, `None` for anything else
fn turn_steps(event: &InputEvent) -> Option<i32> {
    let notches = i32::from(event.rotate_notches.max(1));
    match event.event_type {
        EventType::KnobCw => Some(notches),
        EventType::KnobCcw => Some(-notches),
        _ => None,
    }
}

/// Volume after turning `steps` detents from `current`, one percent each.
///
/// The current volume snaps to a whole percent first and the result stays
/// within 0-100 %.
fn stepped_volume(current: f64, steps: i32) -> f64 {
    let target = (crate::source::percent(current) as i32 + steps).clamp(0, 100);
    f64::from(target) / 100.0
}
