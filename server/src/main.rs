mod console;
mod session;

use clap::Parser;
use console::{parse_console_line, ConsoleInput, HELP};
use rover_shared::{safety, PING};
use session::SessionManager;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "station", about = "Rover control station")]
struct Cli {
    /// Address vehicles connect to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let listener = TcpListener::bind(&cli.bind).await?;
    info!("Station listening on ws://{}", listener.local_addr()?);
    println!("{}", HELP);

    let sessions = SessionManager::new();

    // Keep-alive pings
    let ping_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(safety::HEARTBEAT_INTERVAL_MS));
        loop {
            ticker.tick().await;
            ping_sessions.broadcast(PING).await;

            let silent = ping_sessions
                .silent_vehicles(Duration::from_millis(safety::LINK_TIMEOUT_MS))
                .await;
            for id in silent {
                warn!("Vehicle #{} is not answering pings", id);
            }
        }
    });

    // Operator console
    let console_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => handle_console_line(&console_sessions, &line).await,
                Ok(None) => {
                    info!("Console closed");
                    break;
                }
                Err(e) => {
                    error!("Console read error: {}", e);
                    break;
                }
            }
        }
    });

    loop {
        let (socket, addr) = listener.accept().await?;
        let sessions = sessions.clone();
        tokio::spawn(async move {
            if let Err(e) = session::serve(socket, addr, sessions).await {
                warn!("Connection from {} failed: {}", addr, e);
            }
        });
    }
}

async fn handle_console_line(sessions: &SessionManager, line: &str) {
    match parse_console_line(line) {
        Ok(ConsoleInput::Send(message)) => {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode command: {}", e);
                    return;
                }
            };
            let delivered = sessions.broadcast(&text).await;
            if delivered == 0 {
                warn!("No vehicle connected; {} not sent", text);
            } else {
                info!("Sent {} to {} vehicle(s)", text, delivered);
            }
        }
        Ok(ConsoleInput::Status) => {
            let vehicles = sessions.vehicles().await;
            if vehicles.is_empty() {
                println!("no vehicles connected");
            }
            for v in vehicles {
                println!(
                    "#{} {} role={} connected {:?} ago",
                    v.id,
                    v.addr,
                    v.role.as_deref().unwrap_or("-"),
                    v.connected_at.elapsed()
                );
            }
        }
        Ok(ConsoleInput::Help) => println!("{}", HELP),
        Ok(ConsoleInput::Empty) => {}
        Err(e) => println!("error: {} (type `help`)", e),
    }
}
