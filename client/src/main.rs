use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::{Command, EventType, FieldType, InputEvent, ModuleInfo, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "deckctl")]
#[command(about = "Deckhand Stream Deck Daemon Control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Press a key
    Press {
        /// Key index
        index: u8,
    },

    /// Turn a knob
    Turn {
        /// Knob index
        index: u8,

        /// Rotation direction
        #[arg(value_enum)]
        direction: Direction,

        /// Number of detents to turn
        #[arg(short, long, default_value = "1")]
        notches: u8,
    },

    /// Push a knob down
    Push {
        /// Knob index
        index: u8,
    },

    /// Tap the touch strip above a knob
    Tap {
        /// Knob index
        index: u8,

        /// Hold the tap
        #[arg(short, long)]
        long: bool,
    },

    /// Query daemon status and handlers
    Query,

    /// List available modules and their fields
    Modules,

    /// Ping the daemon to check if it's running
    Ping,

    /// Stop every handler and kill the running daemon
    Kill,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    /// Clockwise
    Cw,
    /// Counter-clockwise
    Ccw,
}

fn knob(index: u8, event: InputEvent) -> Command {
    Command::Knob { index, event }
}

fn to_command(command: Commands) -> Command {
    match command {
        Commands::Press { index } => Command::PressKey { index },
        Commands::Turn {
            index,
            direction,
            notches,
        } => {
            let event_type = match direction {
                Direction::Cw => EventType::KnobCw,
                Direction::Ccw => EventType::KnobCcw,
            };
            knob(index, InputEvent::rotate(event_type, notches.max(1)))
        }
        Commands::Push { index } => knob(index, InputEvent::new(EventType::KnobPress)),
        Commands::Tap { index, long } => {
            let event_type = if long {
                EventType::ScreenLongTap
            } else {
                EventType::ScreenShortTap
            };
            knob(index, InputEvent::new(event_type))
        }
        Commands::Query => Command::Query,
        Commands::Modules => Command::ListModules,
        Commands::Ping => Command::Ping,
        Commands::Kill => Command::Kill,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = to_command(cli.command);

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!("\nIs the daemon running? Try starting it with: deckhand");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response =
        serde_json::from_str(&response_line).context("Malformed response from daemon")?;
    Ok(response)
}

fn print_module(module: &ModuleInfo) {
    println!("  {}", module.name);
    let kinds = [
        ("icon", &module.icon_fields),
        ("key", &module.key_fields),
        ("lcd", &module.lcd_fields),
        ("knob", &module.knob_fields),
    ];
    for (kind, fields) in kinds {
        let Some(fields) = fields else {
            continue;
        };
        println!("    {} handler:", kind);
        for field in fields {
            let detail = match field.field_type {
                FieldType::Text => String::new(),
                FieldType::File => format!(" (file: {})", field.file_types.join(", ")),
                FieldType::Select => format!(" (one of: {})", field.list_items.join(", ")),
            };
            println!("      - {} [{}]{}", field.title, field.name, detail);
        }
    }
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!("  Handlers:");
            for handler in status.handlers {
                println!(
                    "    {} -> {} ({}, {} frames)",
                    handler.slot,
                    handler.module,
                    if handler.running { "running" } else { "stopped" },
                    handler.frames
                );
            }
        }
        Response::Modules(modules) => {
            println!("Available Modules:");
            for module in &modules {
                print_module(module);
            }
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
    }
}
