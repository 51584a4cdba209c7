//! Server binary: flag parsing, logging setup, signal handling.

use emberkv::aof::DEFAULT_AOF_PATH;
use emberkv::server::Server;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

struct Config {
    host: String,
    port: u16,
    aof_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: emberkv::DEFAULT_PORT,
            aof_path: DEFAULT_AOF_PATH.to_string(),
        }
    }
}

impl Config {
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = take_value(&args, i, "--host");
                    i += 2;
                }
                "--port" | "-p" => {
                    let raw = take_value(&args, i, "--port");
                    config.port = raw.parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number '{}'", raw);
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--aof" => {
                    config.aof_path = take_value(&args, i, "--aof");
                    i += 2;
                }
                "--version" | "-v" => {
                    println!("emberkv {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn take_value(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"emberkv - in-memory key-value store with append-only-file durability

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Address to bind (default: 0.0.0.0)
    -p, --port <PORT>    Port to listen on (default: 6379)
        --aof <PATH>     Append-only file path (default: database.aof)
    -v, --version        Print version information
        --help           Print this help message

CONNECTING:
    Any RESP client works:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET greeting hello
    OK
    127.0.0.1:6379> GET greeting
    "hello"
"#
    );
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!(
        version = emberkv::VERSION,
        addr = %config.bind_address(),
        aof = %config.aof_path,
        "starting emberkv"
    );

    let server = Server::bind(&config.bind_address(), &config.aof_path).await?;
    server.run(shutdown_signal()).await?;

    Ok(())
}
