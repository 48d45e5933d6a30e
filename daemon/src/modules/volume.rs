//! Audio server sinks, sources and application streams: LCD status, knob
//! volume control and mute toggling from either a key or the knob.

use common::{EventType, Field, HandlerConfig, HostInfo, InputEvent, ModuleInfo};
use image::DynamicImage;

use super::{
    IMAGE_TYPES, LABEL_FONT_SIZE, load_image_or_blank, required, stepped_volume, turn_steps,
};
use crate::compositor::{Anchor, Compositor};
use crate::handler::{
    BoxFuture, HandlerError, KeyContext, KeyHandler, KnobHandler, RenderError, SourceError,
    Trigger, Widget, WidgetFactory,
};
use crate::source::pulse::{AudioEndpoint, DeviceKind, PulseClient};
use crate::source::{Selector, percent};

pub const NAME: &str = "Volume";

const DEVICE_TYPES: &[&str] = &["sink", "source", "sink_input", "source_output"];

fn selector_fields() -> Vec<Field> {
    vec![
        Field::select("Device Type", "device_type", DEVICE_TYPES),
        Field::text("Input Name", "input_name"),
        Field::text("Properties", "props"),
    ]
}

pub fn info() -> ModuleInfo {
    let mut lcd_fields = selector_fields();
    lcd_fields.push(Field::file("Mute Icon", "mute_icon", IMAGE_TYPES));
    lcd_fields.push(Field::file("Unmute Icon", "unmute_icon", IMAGE_TYPES));

    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: None,
        key_fields: Some(selector_fields()),
        lcd_fields: Some(lcd_fields),
        knob_fields: Some(selector_fields()),
    }
}

fn device_kind(config: &HandlerConfig) -> Result<DeviceKind, HandlerError> {
    required(config, "device_type")?
        .parse()
        .map_err(|reason| HandlerError::InvalidField {
            field: "device_type",
            reason,
        })
}

/// Which endpoints of `kind` a config addresses.
///
/// Sinks and sources follow the server default. Streams are picked by
/// `input_name`, or failing that by every pair in `props`.
fn endpoint_selector(kind: DeviceKind, config: &HandlerConfig) -> Result<Selector, HandlerError> {
    if !kind.is_stream() {
        return Ok(Selector::Active);
    }
    if let Some(name) = config.text("input_name") {
        return Ok(Selector::Named(name.to_string()));
    }
    match config.props("props") {
        Some(props) => Ok(Selector::Props(props)),
        None => Err(HandlerError::MissingField("input_name")),
    }
}

fn target(config: &HandlerConfig) -> Result<(DeviceKind, Selector), HandlerError> {
    let kind = device_kind(config)?;
    Ok((kind, endpoint_selector(kind, config)?))
}

/// Flip mute on every endpoint the config addresses
async fn toggle_mute(pulse: &PulseClient, config: &HandlerConfig) -> Result<(), HandlerError> {
    let (kind, selector) = target(config)?;
    for endpoint in pulse.select(kind, &selector).await? {
        log::debug!("Volume: mute {} -> {}", endpoint.name, !endpoint.muted);
        pulse.set_mute(&endpoint, !endpoint.muted).await?;
    }
    Ok(())
}

/// Volume an endpoint should move to after a turn, or `None` to leave it.
///
/// Muted endpoints are left alone, as are turns pushing past either end.
fn turned_volume(endpoint: &AudioEndpoint, steps: i32) -> Option<f64> {
    if endpoint.muted
        || (steps > 0 && endpoint.volume >= 1.0)
        || (steps < 0 && endpoint.volume <= 0.0)
    {
        return None;
    }
    Some(stepped_volume(endpoint.volume, steps))
}

/// What the LCD shows, compared by its rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Muted,
    Percent(u32),
}

impl Reading {
    fn of(endpoint: &AudioEndpoint) -> Self {
        if endpoint.muted {
            Reading::Muted
        } else {
            Reading::Percent(percent(endpoint.volume))
        }
    }

    fn label(self) -> String {
        match self {
            Reading::Muted => "Muted".to_string(),
            Reading::Percent(value) => format!("{}%", value),
        }
    }
}

struct Face {
    compositor: Compositor,
    mute_icon: DynamicImage,
    unmute_icon: DynamicImage,
    width: u32,
    height: u32,
}

impl Face {
    fn render(&self, reading: Reading) -> Result<DynamicImage, RenderError> {
        let base = match reading {
            Reading::Muted => &self.mute_icon,
            Reading::Percent(_) => &self.unmute_icon,
        };
        self.compositor
            .overlay(base, &reading.label(), LABEL_FONT_SIZE, Anchor::Bottom)
    }
}

pub struct VolumeFactory {
    pulse: PulseClient,
    compositor: Compositor,
}

impl VolumeFactory {
    pub fn new(pulse: PulseClient, compositor: Compositor) -> Self {
        Self { pulse, compositor }
    }
}

impl WidgetFactory for VolumeFactory {
    type Widget = VolumeWidget;

    fn module(&self) -> &'static str {
        NAME
    }

    fn build(
        &mut self,
        config: &HandlerConfig,
        info: &HostInfo,
    ) -> Result<VolumeWidget, HandlerError> {
        let (kind, selector) = target(config)?;
        let (width, height) = (info.lcd_width, info.lcd_height);
        let compositor = &self.compositor;

        Ok(VolumeWidget {
            pulse: self.pulse.clone(),
            kind,
            selector,
            face: Face {
                compositor: compositor.clone(),
                mute_icon: load_image_or_blank(compositor, config, "mute_icon", width, height),
                unmute_icon: load_image_or_blank(compositor, config, "unmute_icon", width, height),
                width,
                height,
            },
        })
    }
}

pub struct VolumeWidget {
    pulse: PulseClient,
    kind: DeviceKind,
    selector: Selector,
    face: Face,
}

impl Widget for VolumeWidget {
    type Value = Reading;

    fn name(&self) -> &str {
        NAME
    }

    async fn trigger(&mut self) -> Result<Trigger, SourceError> {
        let subscription = self.pulse.subscribe(self.kind)?;
        Ok(Trigger::Changes(Box::new(subscription)))
    }

    async fn query(&mut self) -> Result<Reading, SourceError> {
        let endpoints = self.pulse.select(self.kind, &self.selector).await?;
        endpoints
            .first()
            .map(Reading::of)
            .ok_or_else(|| SourceError::DeviceNotFound(self.kind.missing_message().to_string()))
    }

    fn render(&self, reading: &Reading) -> Result<DynamicImage, RenderError> {
        self.face.render(*reading)
    }

    fn render_missing(&self, reason: &str) -> Result<DynamicImage, RenderError> {
        self.face
            .compositor
            .placeholder(self.face.width, self.face.height, reason)
    }
}

/// Turns step the volume by one percent per detent; press and tap toggle mute.
pub struct VolumeKnob {
    pulse: PulseClient,
}

impl VolumeKnob {
    pub fn new(pulse: PulseClient) -> Self {
        Self { pulse }
    }

    async fn turn(&self, config: &HandlerConfig, steps: i32) -> Result<(), HandlerError> {
        let (kind, selector) = target(config)?;
        for endpoint in self.pulse.select(kind, &selector).await? {
            let Some(volume) = turned_volume(&endpoint, steps) else {
                continue;
            };
            log::debug!(
                "Volume: {} {}% -> {}%",
                endpoint.name,
                percent(endpoint.volume),
                percent(volume)
            );
            self.pulse.set_volume(&endpoint, volume).await?;
        }
        Ok(())
    }
}

impl KnobHandler for VolumeKnob {
    fn input<'a>(
        &'a self,
        config: &'a HandlerConfig,
        _info: &'a HostInfo,
        event: InputEvent,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            match event.event_type {
                EventType::KnobPress | EventType::ScreenShortTap => {
                    toggle_mute(&self.pulse, config).await
                }
                _ => match turn_steps(&event) {
                    Some(steps) => self.turn(config, steps).await,
                    None => Ok(()),
                },
            }
        })
    }
}

/// Toggles mute of the addressed endpoints.
pub struct VolumeKey {
    pulse: PulseClient,
}

impl VolumeKey {
    pub fn new(pulse: PulseClient) -> Self {
        Self { pulse }
    }
}

impl KeyHandler for VolumeKey {
    fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(toggle_mute(&self.pulse, ctx.config))
    }
}
