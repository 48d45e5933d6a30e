//! PulseAudio-compatible server access through the `pactl` tool.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use super::{Candidate, Selector};
use crate::handler::{BoxFuture, ChangeStream, HandlerError, SourceError};

const PACTL: &str = "pactl";

/// Server volume corresponding to 100 %
pub const VOLUME_NORM: f64 = 65536.0;

/// Which kind of endpoint a handler controls, parsed once from `device_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sink" => Ok(Self::Sink),
            "source" => Ok(Self::Source),
            "sink_input" => Ok(Self::SinkInput),
            "source_output" => Ok(Self::SourceOutput),
            _ => Err(format!(
                "Invalid device type: {} (expected sink, source, sink_input or source_output)",
                s
            )),
        }
    }
}

impl DeviceKind {
    /// Streams are picked by name or properties, devices by the server default
    pub fn is_stream(self) -> bool {
        matches!(self, Self::SinkInput | Self::SourceOutput)
    }

    /// Placeholder text when nothing matches
    pub fn missing_message(self) -> &'static str {
        match self {
            Self::Sink => "Could not find default sink",
            Self::Source => "Could not find default source",
            Self::SinkInput => "Could not find sink input",
            Self::SourceOutput => "Could not find source output",
        }
    }

    fn list_arg(self) -> &'static str {
        match self {
            Self::Sink => "sinks",
            Self::Source => "sources",
            Self::SinkInput => "sink-inputs",
            Self::SourceOutput => "source-outputs",
        }
    }

    /// Object name as printed in `pactl` commands and events
    fn object(self) -> &'static str {
        match self {
            Self::Sink => "sink",
            Self::Source => "source",
            Self::SinkInput => "sink-input",
            Self::SourceOutput => "source-output",
        }
    }

    /// Whether a subscription event facility concerns this kind.
    ///
    /// Server events matter to sinks and sources, since they announce a
    /// new default.
    pub fn wants_event(self, facility: &str) -> bool {
        facility == self.object() || (!self.is_stream() && facility == "server")
    }
}

#[derive(Debug, Deserialize)]
struct ChannelVolume {
    value: u32,
}

#[derive(Debug, Deserialize)]
struct RawEndpoint {
    index: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mute: bool,
    #[serde(default)]
    volume: BTreeMap<String, ChannelVolume>,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    default_sink_name: Option<String>,
    #[serde(default)]
    default_source_name: Option<String>,
}

/// Snapshot of one sink, source or stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEndpoint {
    pub kind: DeviceKind,
    pub index: u32,
    pub name: String,
    pub muted: bool,
    /// Loudest channel as a fraction of 100 %
    pub volume: f64,
    pub properties: BTreeMap<String, String>,
    pub is_default: bool,
}

impl Candidate for AudioEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.is_default
    }

    fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn property_matches(&self, key: &str, wanted: &str) -> bool {
        self.property(key)
            .is_some_and(|value| value.eq_ignore_ascii_case(wanted))
    }

    fn name_matches(&self, wanted: &str) -> bool {
        self.name.eq_ignore_ascii_case(wanted)
    }
}

/// Raw server volume for a fraction, clamped to 0-100 %
pub fn raw_volume(fraction: f64) -> u32 {
    (fraction.clamp(0.0, 1.0) * VOLUME_NORM).round() as u32
}

/// Parse the output of `pactl -f json list <kind>`
pub fn parse_endpoints(
    kind: DeviceKind,
    json: &str,
    default_name: Option<&str>,
) -> Result<Vec<AudioEndpoint>, SourceError> {
    let raw: Vec<RawEndpoint> = serde_json::from_str(json)
        .map_err(|e| SourceError::Query(format!("unexpected pactl output: {}", e)))?;

    Ok(raw
        .into_iter()
        .map(|endpoint| {
            let properties: BTreeMap<String, String> = endpoint
                .properties
                .into_iter()
                .filter_map(|(key, value)| match value {
                    serde_json::Value::String(value) => Some((key, value)),
                    _ => None,
                })
                .collect();

            let name = endpoint
                .name
                .or_else(|| properties.get("media.name").cloned())
                .or_else(|| properties.get("application.name").cloned())
                .unwrap_or_default();

            let volume = endpoint
                .volume
                .values()
                .map(|channel| f64::from(channel.value) / VOLUME_NORM)
                .fold(0.0, f64::max);

            let is_default = !kind.is_stream() && default_name == Some(name.as_str());

            AudioEndpoint {
                kind,
                index: endpoint.index,
                name,
                muted: endpoint.mute,
                volume,
                properties,
                is_default,
            }
        })
        .collect())
}

/// Facility of a `pactl subscribe` line such as `Event 'change' on sink #3`
pub fn event_facility(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("Event '")?;
    let (_, target) = rest.split_once("' on ")?;
    Some(target.split(" #").next().unwrap_or(target))
}

/// Handle on the audio server, shared by every handler of a module.
#[derive(Debug, Clone)]
pub struct PulseClient {
    program: String,
}

impl PulseClient {
    /// Check that the server answers before any handler is created
    pub async fn connect() -> Result<Self, HandlerError> {
        let client = Self {
            program: PACTL.to_string(),
        };
        client
            .run(&["info"])
            .await
            .map_err(|e| HandlerError::Connection {
                backend: "audio server",
                reason: e.to_string(),
            })?;
        Ok(client)
    }

    async fn run(&self, args: &[&str]) -> Result<String, SourceError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SourceError::Query(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(SourceError::Query(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn default_name(&self, kind: DeviceKind) -> Result<Option<String>, SourceError> {
        let json = self.run(&["-f", "json", "info"]).await?;
        let info: ServerInfo = serde_json::from_str(&json)
            .map_err(|e| SourceError::Query(format!("unexpected pactl output: {}", e)))?;
        Ok(match kind {
            DeviceKind::Sink => info.default_sink_name,
            DeviceKind::Source => info.default_source_name,
            _ => None,
        })
    }

    pub async fn endpoints(&self, kind: DeviceKind) -> Result<Vec<AudioEndpoint>, SourceError> {
        let default_name = if kind.is_stream() {
            None
        } else {
            self.default_name(kind).await?
        };
        let json = self.run(&["-f", "json", "list", kind.list_arg()]).await?;
        parse_endpoints(kind, &json, default_name.as_deref())
    }

    /// Every endpoint of `kind` matching `selector`, or `DeviceNotFound`
    pub async fn select(
        &self,
        kind: DeviceKind,
        selector: &Selector,
    ) -> Result<Vec<AudioEndpoint>, SourceError> {
        let endpoints = self.endpoints(kind).await?;
        selector.resolve_all(endpoints, kind.missing_message())
    }

    pub async fn set_volume(
        &self,
        endpoint: &AudioEndpoint,
        fraction: f64,
    ) -> Result<(), SourceError> {
        let command = format!("set-{}-volume", endpoint.kind.object());
        let index = endpoint.index.to_string();
        let raw = raw_volume(fraction).to_string();
        self.write(&[&command, &index, &raw]).await
    }

    pub async fn set_mute(&self, endpoint: &AudioEndpoint, muted: bool) -> Result<(), SourceError> {
        let command = format!("set-{}-mute", endpoint.kind.object());
        let index = endpoint.index.to_string();
        let flag = if muted { "1" } else { "0" };
        self.write(&[&command, &index, flag]).await
    }

    async fn write(&self, args: &[&str]) -> Result<(), SourceError> {
        self.run(args).await.map(|_| ()).map_err(|e| match e {
            SourceError::Query(reason) => SourceError::Write(reason),
            other => other,
        })
    }

    /// Follow server change events concerning `kind`
    pub fn subscribe(&self, kind: DeviceKind) -> Result<Subscription, SourceError> {
        let mut child = Command::new(&self.program)
            .arg("subscribe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Query(format!("failed to subscribe: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Query("subscription has no output".to_string()))?;

        Ok(Subscription {
            kind,
            _child: child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

/// Live `pactl subscribe` process. The process is killed when dropped.
pub struct Subscription {
    kind: DeviceKind,
    _child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ChangeStream for Subscription {
    fn changed(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            loop {
                match self.lines.next_line().await {
                    Ok(Some(line)) => {
                        if event_facility(&line).is_some_and(|f| self.kind.wants_event(f)) {
                            return true;
                        }
                    }
                    Ok(None) => return false,
                    Err(e) => {
                        log::warn!("Audio server subscription failed: {}", e);
                        return false;
                    }
                }
            }
        })
    }
}
