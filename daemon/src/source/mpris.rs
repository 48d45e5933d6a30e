use std::collections::HashMap;
use zbus::fdo::DBusProxy;
use zbus::proxy::CacheProperties;
use zbus::zvariant::OwnedValue;
use zbus::{Connection, proxy};

use super::{Candidate, Selector};
use crate::handler::{HandlerError, SourceError};

const BUS_PREFIX: &str = "org.mpris.MediaPlayer2.";
const ART_URL_KEY: &str = "mpris:artUrl";
const NO_PLAYER: &str = "Found no player";

#[proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2",
    gen_blocking = false
)]
trait MediaPlayer {
    fn play_pause(&self) -> zbus::Result<()>;
    fn play(&self) -> zbus::Result<()>;
    fn pause(&self) -> zbus::Result<()>;
    fn next(&self) -> zbus::Result<()>;
    fn previous(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn volume(&self) -> zbus::Result<f64>;
    #[zbus(property)]
    fn set_volume(&self, volume: f64) -> zbus::Result<()>;

    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn loop_status(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn set_loop_status(&self, status: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn shuffle(&self) -> zbus::Result<bool>;
    #[zbus(property)]
    fn set_shuffle(&self, shuffle: bool) -> zbus::Result<()>;

    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Playing" => Some(Self::Playing),
            "Paused" => Some(Self::Paused),
            "Stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Repeat mode of a player. Unknown values read as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    None,
    Track,
    Playlist,
}

impl LoopStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Track" => Self::Track,
            "Playlist" => Self::Playlist,
            _ => Self::None,
        }
    }

    /// None -> Track -> Playlist -> None
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Track,
            Self::Track => Self::Playlist,
            Self::Playlist => Self::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Track => "Track",
            Self::Playlist => "Playlist",
        }
    }
}

/// Player name without the well-known MPRIS bus prefix
pub fn short_name(bus_name: &str) -> Option<&str> {
    bus_name.strip_prefix(BUS_PREFIX).filter(|name| !name.is_empty())
}

/// One MPRIS player on the session bus.
pub struct Player {
    name: String,
    proxy: MediaPlayerProxy<'static>,
}

impl Player {
    pub fn short_name(&self) -> &str {
        &self.name
    }

    pub async fn volume(&self) -> Result<f64, SourceError> {
        self.proxy.volume().await.map_err(SourceError::query)
    }

    pub async fn set_volume(&self, volume: f64) -> Result<(), SourceError> {
        self.proxy
            .set_volume(volume.clamp(0.0, 1.0))
            .await
            .map_err(SourceError::write)
    }

    pub async fn playback_status(&self) -> Result<Option<PlaybackStatus>, SourceError> {
        let status = self
            .proxy
            .playback_status()
            .await
            .map_err(SourceError::query)?;
        Ok(PlaybackStatus::parse(&status))
    }

    pub async fn loop_status(&self) -> Result<LoopStatus, SourceError> {
        let status = self.proxy.loop_status().await.map_err(SourceError::query)?;
        Ok(LoopStatus::parse(&status))
    }

    pub async fn set_loop_status(&self, status: LoopStatus) -> Result<(), SourceError> {
        self.proxy
            .set_loop_status(status.as_str())
            .await
            .map_err(SourceError::write)
    }

    pub async fn shuffle(&self) -> Result<bool, SourceError> {
        self.proxy.shuffle().await.map_err(SourceError::query)
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<(), SourceError> {
        self.proxy
            .set_shuffle(shuffle)
            .await
            .map_err(SourceError::write)
    }

    /// Album art location of the current track, if the player exposes one
    pub async fn art_url(&self) -> Result<Option<String>, SourceError> {
        let mut metadata = self.proxy.metadata().await.map_err(SourceError::query)?;
        Ok(metadata
            .remove(ART_URL_KEY)
            .and_then(|value| String::try_from(value).ok())
            .filter(|url| !url.is_empty()))
    }

    pub async fn play_pause(&self) -> Result<(), SourceError> {
        self.proxy.play_pause().await.map_err(SourceError::write)
    }

    pub async fn play(&self) -> Result<(), SourceError> {
        self.proxy.play().await.map_err(SourceError::write)
    }

    pub async fn pause(&self) -> Result<(), SourceError> {
        self.proxy.pause().await.map_err(SourceError::write)
    }

    pub async fn next(&self) -> Result<(), SourceError> {
        self.proxy.next().await.map_err(SourceError::write)
    }

    pub async fn previous(&self) -> Result<(), SourceError> {
        self.proxy.previous().await.map_err(SourceError::write)
    }
}

struct Listed {
    player: Player,
    playing: bool,
}

impl Candidate for Listed {
    fn name(&self) -> &str {
        self.player.short_name()
    }

    fn is_active(&self) -> bool {
        self.playing
    }
}

/// Session bus connection shared by every MPRIS handler of a module.
#[derive(Clone)]
pub struct MediaBus {
    connection: Connection,
}

impl MediaBus {
    pub async fn connect() -> Result<Self, HandlerError> {
        let connection = Connection::session()
            .await
            .map_err(|e| HandlerError::Connection {
                backend: "session bus",
                reason: e.to_string(),
            })?;
        Ok(Self { connection })
    }

    /// Every MPRIS player currently on the bus, in listing order
    pub async fn players(&self) -> Result<Vec<Player>, SourceError> {
        let dbus = DBusProxy::new(&self.connection)
            .await
            .map_err(SourceError::query)?;
        let names = dbus.list_names().await.map_err(SourceError::query)?;

        let mut players = Vec::new();
        for bus_name in names {
            let bus_name = bus_name.to_string();
            let Some(name) = short_name(&bus_name).map(str::to_string) else {
                continue;
            };

            let proxy = MediaPlayerProxy::builder(&self.connection)
                .destination(bus_name)
                .map_err(SourceError::query)?
                .cache_properties(CacheProperties::No)
                .build()
                .await
                .map_err(SourceError::query)?;
            players.push(Player { name, proxy });
        }
        Ok(players)
    }

    /// Resolve `selector` against the players on the bus.
    ///
    /// Without a name, the first playing player wins. With `needs_volume`,
    /// players whose volume cannot be read are passed over.
    pub async fn select(
        &self,
        selector: &Selector,
        needs_volume: bool,
    ) -> Result<Player, SourceError> {
        let mut listed = Vec::new();
        for player in self.players().await? {
            let playing = match selector {
                Selector::Active => Self::is_playing(&player, needs_volume).await,
                _ => false,
            };
            listed.push(Listed { player, playing });
        }

        let found = selector.resolve(listed, NO_PLAYER)?;
        Ok(found.player)
    }

    async fn is_playing(player: &Player, needs_volume: bool) -> bool {
        if needs_volume && player.volume().await.is_err() {
            return false;
        }
        match player.playback_status().await {
            Ok(status) => status == Some(PlaybackStatus::Playing),
            Err(e) => {
                log::debug!("{}: {}", player.short_name(), e);
                false
            }
        }
    }
}
