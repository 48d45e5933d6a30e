//! Common types and utilities for Deckhand.
//!
//! This crate defines the data a controller host hands to the handler
//! runtime (`HandlerConfig`, `HostInfo`, `InputEvent`), the field
//! descriptors modules advertise, and the IPC protocol spoken between the
//! daemon (`deckhand`) and the client (`deckctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages, one per line. The client sends [`Command`] variants and receives
//! [`Response`] variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, EventType, InputEvent};
//!
//! // Turn the first knob two notches clockwise
//! let cmd = Command::Knob {
//!     index: 0,
//!     event: InputEvent::rotate(EventType::KnobCw, 2),
//! };
//!
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum DeckError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for DeckError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DeckError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// A single configured option value.
///
/// Hosts hand over plain strings for text and file fields, and string maps
/// for property filters. Map entries may be null in JSON configs; those are
/// ignored when the map is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Map(BTreeMap<String, Option<String>>),
}

/// Immutable option name to value mapping supplied to a handler.
///
/// Shape is validated by the host, presence is not: handlers check their
/// required keys when they start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerConfig(BTreeMap<String, FieldValue>);

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful for hosts and tests.
    pub fn with(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Builder-style insert of a text value.
    pub fn with_text(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, FieldValue::Text(value.into()))
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Text value for `key`. Empty strings count as absent.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(FieldValue::Text(value)) if !value.is_empty() => Some(value.as_str()),
            _ => None,
        }
    }

    /// String map for `key`.
    ///
    /// Accepts either a map value or a `k=v,k2=v2` text value, since hosts
    /// that only offer text inputs store property filters that way.
    pub fn props(&self, key: &str) -> Option<BTreeMap<String, String>> {
        match self.0.get(key)? {
            FieldValue::Map(map) => Some(
                map.iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                    .collect(),
            ),
            FieldValue::Text(text) => {
                let props: BTreeMap<String, String> = text
                    .split(',')
                    .filter_map(|pair| {
                        let (k, v) = pair.split_once('=')?;
                        let k = k.trim();
                        (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
                    })
                    .collect();
                (!props.is_empty()).then_some(props)
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Geometry of the controller the handlers render for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Edge length of a square key icon, in pixels
    pub icon_size: u32,
    /// Width of one knob's LCD segment
    pub lcd_width: u32,
    /// Height of one knob's LCD segment
    pub lcd_height: u32,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            icon_size: 72,
            lcd_width: 200,
            lcd_height: 100,
        }
    }
}

/// Kind of input delivered to a knob or touch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    KnobCw,
    KnobCcw,
    KnobPress,
    ScreenShortTap,
    ScreenLongTap,
    ScreenSwipe,
}

/// An input event from a knob or the touch strip above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub event_type: EventType,
    /// Number of detents turned, only meaningful for rotations
    #[serde(default)]
    pub rotate_notches: u8,
}

impl InputEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            rotate_notches: 0,
        }
    }

    pub fn rotate(event_type: EventType, notches: u8) -> Self {
        Self {
            event_type,
            rotate_notches: notches,
        }
    }
}

/// Input widget type of a configurable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    File,
    Select,
}

/// Describes one configurable option of a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub title: String,
    pub name: String,
    pub field_type: FieldType,
    /// Allowed extensions for `File` fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_types: Vec<String>,
    /// Choices for `Select` fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list_items: Vec<String>,
}

impl Field {
    pub fn text(title: &str, name: &str) -> Self {
        Self {
            title: title.to_string(),
            name: name.to_string(),
            field_type: FieldType::Text,
            file_types: Vec::new(),
            list_items: Vec::new(),
        }
    }

    pub fn file(title: &str, name: &str, file_types: &[&str]) -> Self {
        Self {
            field_type: FieldType::File,
            file_types: file_types.iter().map(|t| t.to_string()).collect(),
            ..Self::text(title, name)
        }
    }

    pub fn select(title: &str, name: &str, items: &[&str]) -> Self {
        Self {
            field_type: FieldType::Select,
            list_items: items.iter().map(|t| t.to_string()).collect(),
            ..Self::text(title, name)
        }
    }
}

/// What a module offers, as advertised to hosts and `deckctl modules`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub icon_fields: Option<Vec<Field>>,
    pub key_fields: Option<Vec<Field>>,
    pub lcd_fields: Option<Vec<Field>>,
    pub knob_fields: Option<Vec<Field>>,
}

/// Commands sent from client to daemon via IPC.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Simulate a key press on the key at `index`
    PressKey { index: u8 },
    /// Deliver a knob or touch event to the knob at `index`
    Knob { index: u8, event: InputEvent },
    /// Query daemon status
    Query,
    /// List registered modules and their fields
    ListModules,
    /// Check that the daemon is alive
    Ping,
    /// Stop every handler and exit
    Kill,
}

/// Responses sent from daemon to client.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(DeckError),
    Status(DaemonStatus),
    Modules(Vec<ModuleInfo>),
    Pong,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub handlers: Vec<HandlerStatus>,
}

/// One configured display handler as seen by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerStatus {
    /// Control the handler is bound to, e.g. `key 3` or `knob 0`
    pub slot: String,
    pub module: String,
    pub running: bool,
    pub frames: u64,
}

/// Get the IPC socket path.
///
/// Uses `$XDG_RUNTIME_DIR/deckhand.sock`, falling back to
/// `/run/user/<uid>/deckhand.sock`.
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("deckhand.sock")
}
