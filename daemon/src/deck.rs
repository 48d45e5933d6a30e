//! Reference host: binds handlers to keys and knobs from the config, feeds
//! them input and collects their frames.

use common::{DeckError, HandlerConfig, HandlerStatus, HostInfo, InputEvent};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::handler::{
    DisplayHandler, HandlerError, IconView, KeyContext, KeyHandler, KnobHandler, RenderCallback,
};
use crate::log_and_continue;
use crate::modules::{ModuleContext, ModuleKind};

/// How long shutdown waits for polling loops to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Key,
    Knob,
}

impl Control {
    fn name(self) -> &'static str {
        match self {
            Control::Key => "key",
            Control::Knob => "knob",
        }
    }
}

/// An icon or LCD handler and what it has rendered so far
struct Display {
    slot: String,
    module: &'static str,
    config: HandlerConfig,
    handler: Box<dyn DisplayHandler>,
    frames: Arc<AtomicU64>,
    started: bool,
}

impl Display {
    fn view(&self) -> IconView {
        let mut view = self.handler.view();
        view.module.get_or_insert_with(|| self.module.to_string());
        view
    }
}

struct Input<H: ?Sized> {
    module: &'static str,
    config: HandlerConfig,
    handler: Arc<H>,
}

impl<H: ?Sized> Clone for Input<H> {
    fn clone(&self) -> Self {
        Self {
            module: self.module,
            config: self.config.clone(),
            handler: self.handler.clone(),
        }
    }
}

#[derive(Default)]
struct KeySlot {
    icon: Option<Display>,
    press: Option<Input<dyn KeyHandler>>,
}

#[derive(Default)]
struct KnobSlot {
    lcd: Option<Display>,
    input: Option<Input<dyn KnobHandler>>,
}

/// A key press resolved against the deck, run without holding the deck.
pub struct KeyPress {
    index: u8,
    info: HostInfo,
    icon: IconView,
    input: Input<dyn KeyHandler>,
}

impl KeyPress {
    pub async fn run(self) -> Result<(), HandlerError> {
        log::debug!("{} key handler on key {}", self.input.module, self.index);
        self.input
            .handler
            .key(KeyContext {
                config: &self.input.config,
                info: &self.info,
                icon: self.icon,
            })
            .await
    }
}

/// A knob or touch event resolved against the deck.
pub struct KnobTurn {
    index: u8,
    info: HostInfo,
    event: InputEvent,
    input: Input<dyn KnobHandler>,
}

impl KnobTurn {
    pub async fn run(self) -> Result<(), HandlerError> {
        log::debug!(
            "{} knob handler on knob {}: {:?}",
            self.input.module,
            self.index,
            self.event.event_type
        );
        self.input
            .handler
            .input(&self.input.config, &self.info, self.event)
            .await
    }
}

/// All configured controls of one device.
pub struct Deck {
    info: HostInfo,
    output_dir: Option<PathBuf>,
    keys: BTreeMap<u8, KeySlot>,
    knobs: BTreeMap<u8, KnobSlot>,
}

fn module_kind(name: Option<&str>, slot: &str) -> Option<ModuleKind> {
    match name?.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            log::warn!("Skipping {}: {}", slot, e);
            None
        }
    }
}

/// Unwrap a registry answer, logging why a handler is absent
fn created<T>(
    result: Result<Option<T>, HandlerError>,
    role: &str,
    kind: ModuleKind,
    slot: &str,
) -> Option<T> {
    match result {
        Ok(Some(handler)) => Some(handler),
        Ok(None) => {
            log::warn!("Module {} has no {} handler ({})", kind.name(), role, slot);
            None
        }
        Err(e) => {
            log::error!(
                "Failed to create {} {} handler for {}: {}",
                kind.name(),
                role,
                slot,
                e
            );
            None
        }
    }
}

fn display(
    slot: &str,
    kind: ModuleKind,
    config: &HandlerConfig,
    handler: Box<dyn DisplayHandler>,
) -> Display {
    Display {
        slot: slot.to_string(),
        module: kind.name(),
        config: config.clone(),
        handler,
        frames: Arc::new(AtomicU64::new(0)),
        started: false,
    }
}

fn input<H: ?Sized>(kind: ModuleKind, config: &HandlerConfig, handler: Arc<H>) -> Input<H> {
    Input {
        module: kind.name(),
        config: config.clone(),
        handler,
    }
}

/// Callback counting frames and keeping the latest one on disk
fn frame_sink(
    output_dir: Option<&Path>,
    control: Control,
    index: u8,
    frames: &Arc<AtomicU64>,
) -> RenderCallback {
    let frames = frames.clone();
    let path = output_dir.map(|dir| dir.join(format!("{}-{}.png", control.name(), index)));

    Arc::new(move |frame: DynamicImage| {
        frames.fetch_add(1, Ordering::Relaxed);
        if let Some(path) = &path {
            log_and_continue!(frame.save(path), format!("write {}", path.display()));
        }
    })
}

impl Deck {
    /// Create every handler named in `config`.
    ///
    /// Unknown modules and handlers failing to be created are logged and
    /// left out; the rest of the deck still works.
    pub async fn build(config: &Config, modules: &ModuleContext) -> Self {
        let mut deck = Self {
            info: config.general.host_info(),
            output_dir: config.general.output_dir(),
            keys: BTreeMap::new(),
            knobs: BTreeMap::new(),
        };

        for key in &config.key {
            let slot_name = format!("key {}", key.index);
            let mut slot = KeySlot::default();

            if let Some(kind) = module_kind(key.icon_handler.as_deref(), &slot_name) {
                let handler = modules.icon_handler(kind).await;
                slot.icon = created(handler, "icon", kind, &slot_name)
                    .map(|h| display(&slot_name, kind, &key.icon_fields, h));
            }
            if let Some(kind) = module_kind(key.key_handler.as_deref(), &slot_name) {
                let handler = modules.key_handler(kind).await;
                slot.press = created(handler, "key", kind, &slot_name)
                    .map(|h| input(kind, &key.key_fields, h));
            }

            deck.keys.insert(key.index, slot);
        }

        for knob in &config.knob {
            let slot_name = format!("knob {}", knob.index);
            let mut slot = KnobSlot::default();

            if let Some(kind) = module_kind(knob.lcd_handler.as_deref(), &slot_name) {
                let handler = modules.lcd_handler(kind).await;
                slot.lcd = created(handler, "lcd", kind, &slot_name)
                    .map(|h| display(&slot_name, kind, &knob.lcd_fields, h));
            }
            if let Some(kind) = module_kind(knob.knob_handler.as_deref(), &slot_name) {
                let handler = modules.knob_handler(kind).await;
                slot.input = created(handler, "knob", kind, &slot_name)
                    .map(|h| input(kind, &knob.knob_fields, h));
            }

            deck.knobs.insert(knob.index, slot);
        }

        deck
    }

    fn displays_mut(&mut self) -> impl Iterator<Item = (Control, u8, &mut Display)> {
        let keys = self
            .keys
            .iter_mut()
            .filter_map(|(index, slot)| Some((Control::Key, *index, slot.icon.as_mut()?)));
        let knobs = self
            .knobs
            .iter_mut()
            .filter_map(|(index, slot)| Some((Control::Knob, *index, slot.lcd.as_mut()?)));
        keys.chain(knobs)
    }

    fn displays(&self) -> impl Iterator<Item = &Display> {
        let keys = self.keys.values().filter_map(|slot| slot.icon.as_ref());
        let knobs = self.knobs.values().filter_map(|slot| slot.lcd.as_ref());
        keys.chain(knobs)
    }

    /// Start every icon and LCD handler
    pub fn start(&mut self) {
        if let Some(dir) = &self.output_dir {
            log_and_continue!(
                std::fs::create_dir_all(dir),
                format!("create output directory {}", dir.display())
            );
        }

        let info = self.info;
        let output_dir = self.output_dir.clone();
        for (control, index, display) in self.displays_mut() {
            let callback = frame_sink(output_dir.as_deref(), control, index, &display.frames);
            match display.handler.start(&display.config, &info, callback) {
                Ok(()) => {
                    display.started = true;
                    log::info!("Started {} on {}", display.module, display.slot);
                }
                Err(e) => log::error!(
                    "Failed to start {} on {}: {}",
                    display.module,
                    display.slot,
                    e
                ),
            }
        }
    }

    /// Resolve a key press to its handler, with the icon it sits under
    pub fn key_press(&self, index: u8) -> Result<KeyPress, DeckError> {
        let slot = self
            .keys
            .get(&index)
            .ok_or_else(|| DeckError::NotFound(format!("No key {} configured", index)))?;
        let input = slot
            .press
            .clone()
            .ok_or_else(|| DeckError::NotFound(format!("Key {} has no key handler", index)))?;

        Ok(KeyPress {
            index,
            info: self.info,
            icon: slot.icon.as_ref().map(Display::view).unwrap_or_default(),
            input,
        })
    }

    pub fn knob_turn(&self, index: u8, event: InputEvent) -> Result<KnobTurn, DeckError> {
        let input = self
            .knobs
            .get(&index)
            .ok_or_else(|| DeckError::NotFound(format!("No knob {} configured", index)))?
            .input
            .clone()
            .ok_or_else(|| DeckError::NotFound(format!("Knob {} has no knob handler", index)))?;

        Ok(KnobTurn {
            index,
            info: self.info,
            event,
            input,
        })
    }

    pub fn status(&self) -> Vec<HandlerStatus> {
        self.displays()
            .map(|display| HandlerStatus {
                slot: display.slot.clone(),
                module: display.module.to_string(),
                running: display.handler.is_running(),
                frames: display.frames.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Stop every started handler once and hand back their tasks
    pub fn stop_all(&mut self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for (_, _, display) in self.displays_mut() {
            if !std::mem::take(&mut display.started) {
                continue;
            }
            display.handler.stop();
            display.handler.set_running(false);
            tasks.extend(display.handler.take_tasks());
        }
        tasks
    }
}

/// Wait for stopped handlers' loops to exit, up to a fixed deadline
pub async fn join_stopped(tasks: Vec<JoinHandle<()>>) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_TIMEOUT;
    for task in tasks {
        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Handler task failed: {}", e),
            Err(_) => {
                log::warn!("Handlers did not stop within {:?}", SHUTDOWN_TIMEOUT);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::Compositor;
    use crate::handler::BoxFuture;
    use common::EventType;
    use std::sync::atomic::AtomicUsize;

    fn context() -> ModuleContext {
        ModuleContext::new(Compositor::without_font()).unwrap()
    }

    fn config(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[tokio::test]
    async fn test_noop_icons_render_and_stop_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(
            "[[key]]\nindex = 0\nicon_handler = \"NoOp\"\n\
             [[key]]\nindex = 3\nicon_handler = \"NoOp\"\n",
        );
        config.general.output_dir = Some(dir.path().to_string_lossy().into_owned());

        let mut deck = Deck::build(&config, &context()).await;
        deck.start();

        let status = deck.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].slot, "key 0");
        assert_eq!(status[1].module, "NoOp");
        assert!(status.iter().all(|s| s.running && s.frames == 1));
        assert!(dir.path().join("key-3.png").is_file());

        assert!(deck.stop_all().is_empty());
        assert!(deck.status().iter().all(|s| !s.running));
        // Already stopped handlers are not stopped again
        assert!(deck.stop_all().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_unsupported_modules_are_skipped() {
        let config = config(
            "[[key]]\nindex = 1\nicon_handler = \"Spotify\"\nkey_handler = \"NoOp\"\n\n[[knob]]\nindex = 0\nlcd_handler = \"Toggle\"\n",
        );
        let deck = Deck::build(&config, &context()).await;

        assert!(deck.status().is_empty());
        assert!(matches!(deck.key_press(1), Err(DeckError::NotFound(_))));
        assert!(matches!(
            deck.knob_turn(0, InputEvent::new(EventType::KnobPress)),
            Err(DeckError::NotFound(_))
        ));
        assert!(matches!(deck.key_press(9), Err(DeckError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_start_is_not_stopped() {
        // Toggle without a check command refuses to start
        let config = config("[[key]]\nindex = 2\nicon_handler = \"Toggle\"\n");
        let mut deck = Deck::build(&config, &context()).await;
        deck.start();

        assert_eq!(deck.status()[0].frames, 0);
        assert!(deck.stop_all().is_empty());
    }

    struct Recorder(Arc<AtomicUsize>);

    impl KeyHandler for Recorder {
        fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>> {
            Box::pin(async move {
                assert_eq!(ctx.icon.module.as_deref(), Some("NoOp"));
                assert_eq!(ctx.config.text("note"), Some("hello"));
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_key_press_sees_icon_module() {
        let mut deck = Deck::build(
            &config("[[key]]\nindex = 5\nicon_handler = \"NoOp\"\n"),
            &context(),
        )
        .await;

        let presses = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn KeyHandler> = Arc::new(Recorder(presses.clone()));
        if let Some(slot) = deck.keys.get_mut(&5) {
            slot.press = Some(Input {
                module: "Recorder",
                config: HandlerConfig::new().with_text("note", "hello"),
                handler,
            });
        }

        deck.key_press(5).unwrap().run().await.unwrap();
        assert_eq!(presses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_stopped_waits_for_tasks() {
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks = (0..3)
            .map(|_| {
                let finished = finished.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        join_stopped(tasks).await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}
