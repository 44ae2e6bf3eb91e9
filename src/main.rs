// src/main.rs
//
// Command-line front end over the session manager: list ports, send one
// command character, or capture newline-terminated records to a file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use linecap::{
    list_ports, CaptureOptions, CaptureState, CommandRequest, DeviceProfile, Error, FileSink,
    SerialConfig, SessionManager, WriteMode,
};

#[derive(Parser)]
#[command(name = "linecap", version, about = "Serial device command and capture tool")]
struct Cli {
    /// Device profile TOML; command-line flags override its values.
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Mirror logs into a timestamped file under this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports visible to this host
    Ports {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Send one command character, optionally waiting for a reply line
    Send {
        /// Command character (e.g. r, g, b, o, t)
        command: char,

        #[arg(short, long)]
        port: Option<String>,

        #[arg(short, long)]
        baud: Option<u32>,

        /// Wait for one reply line even if the alphabet says otherwise
        #[arg(long)]
        expect_reply: bool,
    },
    /// Capture newline-terminated records from the device to a file
    Capture {
        /// Output file, truncated before the session starts
        #[arg(short, long)]
        output: PathBuf,

        /// Number of lines to capture
        #[arg(short = 'n', long, default_value_t = 500)]
        lines: u64,

        #[arg(short, long)]
        port: Option<String>,

        #[arg(short, long)]
        baud: Option<u32>,

        /// Echo captured lines to stdout as they arrive
        #[arg(long)]
        echo: bool,
    },
}

fn resolve_config(profile: &DeviceProfile, port: Option<String>, baud: Option<u32>) -> SerialConfig {
    let mut config = profile.serial_config();
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(baud) = baud {
        config.baud_rate = baud;
    }
    config
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("linecap: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> linecap::Result<()> {
    if let Some(dir) = &cli.log_dir {
        linecap::init_file_logging(dir)?;
    }
    let profile = match &cli.profile {
        Some(path) => DeviceProfile::load(path)?,
        None => DeviceProfile::default(),
    };

    match cli.command {
        Command::Ports { json } => {
            let ports = list_ports()?;
            if json {
                let rendered = serde_json::to_string_pretty(&ports)
                    .map_err(|e| Error::Config(format!("failed to encode port list: {}", e)))?;
                println!("{}", rendered);
            } else if ports.is_empty() {
                println!("no serial ports found");
            } else {
                for port in ports {
                    let product = port.product.as_deref().unwrap_or("");
                    println!("{}  [{}]  {}", port.port_name, port.port_type, product);
                }
            }
        }
        Command::Send {
            command,
            port,
            baud,
            expect_reply,
        } => {
            let config = resolve_config(&profile, port, baud);
            let alphabet = profile.command_set()?;
            let request = if expect_reply {
                CommandRequest::new(command, true)
            } else {
                CommandRequest::from_set(&alphabet, command)
            };

            let mut manager = SessionManager::open_with_device(config)?;
            let result = manager.run_command(request);
            manager.shutdown().await;
            if let Some(reply) = result? {
                println!("{}", reply);
            }
        }
        Command::Capture {
            output,
            lines,
            port,
            baud,
            echo,
        } => {
            let config = resolve_config(&profile, port, baud);
            let sink = FileSink::create(&output, WriteMode::Truncate)?;
            let options = if echo {
                CaptureOptions::new(lines).with_line_listener(|_, line| println!("{}", line))
            } else {
                CaptureOptions::new(lines)
            };

            let mut manager = SessionManager::open_with_device(config)?;
            let mut handle = match manager.start_capture(options, Box::new(sink)).await {
                Ok(handle) => handle,
                Err(e) => {
                    manager.shutdown().await;
                    return Err(e);
                }
            };

            // Ctrl-C requests cancellation; already-captured lines are kept.
            let canceller = handle.canceller();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });

            let status = handle.wait().await;
            ctrl_c.abort();
            manager.shutdown().await;

            match status.state {
                CaptureState::Completed => println!(
                    "captured {} line(s) to {}",
                    status.lines_written,
                    output.display()
                ),
                CaptureState::Cancelled => println!(
                    "capture cancelled after {} line(s); partial output kept in {}",
                    status.lines_written,
                    output.display()
                ),
                CaptureState::Failed(reason) => {
                    eprintln!(
                        "capture failed after {} line(s): {}",
                        status.lines_written, reason
                    );
                    std::process::exit(1);
                }
                CaptureState::Idle | CaptureState::Running => {}
            }
        }
    }

    Ok(())
}
