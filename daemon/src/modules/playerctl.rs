//! Media player transport controls over MPRIS.

use common::{Field, ModuleInfo};
use std::str::FromStr;

use super::required;
use crate::handler::{BoxFuture, HandlerError, KeyContext, KeyHandler};
use crate::source::Selector;
use crate::source::mpris::{MediaBus, Player};

pub const NAME: &str = "Playerctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PlayPause,
    Play,
    Pause,
    Previous,
    Next,
    Shuffle,
    LoopStatus,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::PlayPause,
        Operation::Play,
        Operation::Pause,
        Operation::Previous,
        Operation::Next,
        Operation::Shuffle,
        Operation::LoopStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::PlayPause => "PlayPause",
            Operation::Play => "Play",
            Operation::Pause => "Pause",
            Operation::Previous => "Previous",
            Operation::Next => "Next",
            Operation::Shuffle => "Shuffle",
            Operation::LoopStatus => "LoopStatus",
        }
    }

    async fn apply(self, player: &Player) -> Result<(), HandlerError> {
        match self {
            Operation::PlayPause => player.play_pause().await?,
            Operation::Play => player.play().await?,
            Operation::Pause => player.pause().await?,
            Operation::Previous => player.previous().await?,
            Operation::Next => player.next().await?,
            Operation::Shuffle => {
                let shuffle = player.shuffle().await?;
                player.set_shuffle(!shuffle).await?;
            }
            Operation::LoopStatus => {
                let status = player.loop_status().await?;
                player.set_loop_status(status.next()).await?;
            }
        }
        Ok(())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation {}", s))
    }
}

pub fn info() -> ModuleInfo {
    let operations: Vec<&str> = Operation::ALL.iter().map(|op| op.as_str()).collect();
    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: None,
        key_fields: Some(vec![
            Field::text("Player Name", "player_name"),
            Field::select("Operation", "operation", &operations),
        ]),
        lcd_fields: None,
        knob_fields: None,
    }
}

/// Applies the configured operation to the named or currently playing player.
pub struct PlayerctlKey {
    bus: MediaBus,
}

impl PlayerctlKey {
    pub fn new(bus: MediaBus) -> Self {
        Self { bus }
    }
}

impl KeyHandler for PlayerctlKey {
    fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let operation: Operation = required(ctx.config, "operation")?
                .parse()
                .map_err(|reason| HandlerError::InvalidField {
                    field: "operation",
                    reason,
                })?;

            let selector = Selector::named_or_active(ctx.config.text("player_name"));
            let player = self.bus.select(&selector, false).await?;

            log::debug!("Playerctl: {} on {}", operation.as_str(), player.short_name());
            operation.apply(&player).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_from_str() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
        assert!("playpause".parse::<Operation>().is_err());
        assert!("Stop".parse::<Operation>().is_err());
    }

    #[test]
    fn test_info_lists_every_operation() {
        let info = info();
        let fields = info.key_fields.unwrap();
        let operation = fields.iter().find(|f| f.name == "operation").unwrap();
        assert_eq!(operation.list_items.len(), Operation::ALL.len());
        assert!(operation.list_items.contains(&"LoopStatus".to_string()));
    }
}
