use anyhow::Result;
use common::{Command, DaemonStatus, DeckError, Response};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::DaemonState;
use crate::handler::HandlerError;

pub async fn start(state: Arc<Mutex<DaemonState>>) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if state.lock().await.should_exit {
            break;
        }

        // Accept connections with timeout
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => {
                // Timeout, continue loop to check exit condition
                continue;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(stream: UnixStream, state: Arc<Mutex<DaemonState>>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &state).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(DeckError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command(command: Command, state: &Arc<Mutex<DaemonState>>) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Query => {
            let state = state.lock().await;
            Response::Status(DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                handlers: state.deck.status(),
            })
        }

        Command::ListModules => Response::Modules(crate::modules::module_infos()),

        Command::PressKey { index } => {
            // The deck stays unlocked while the handler runs
            let press = state.lock().await.deck.key_press(index);
            match press {
                Ok(press) => input_result(press.run().await, "key", index),
                Err(e) => Response::Error(e),
            }
        }

        Command::Knob { index, event } => {
            let turn = state.lock().await.deck.knob_turn(index, event);
            match turn {
                Ok(turn) => input_result(turn.run().await, "knob", index),
                Err(e) => Response::Error(e),
            }
        }

        Command::Kill => {
            log::info!("Received kill command");
            state.lock().await.should_exit = true;
            Response::Ok
        }
    }
}

fn input_result(result: Result<(), HandlerError>, control: &str, index: u8) -> Response {
    match result {
        Ok(()) => Response::Ok,
        Err(e) => {
            log::error!("Input on {} {} failed: {}", control, index, e);
            Response::Error(DeckError::Handler(e.to_string()))
        }
    }
}
