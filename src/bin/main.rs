use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stopmotion::config::{self, SettingsOverrides};
use stopmotion::preview::{StatusSink, Streamer, format_status};
use stopmotion::rename::AutoRename;
use stopmotion::shell::Registry;
use tokio::io::{AsyncBufReadExt, BufReader, stdin};

/// Live preview and capture for cameras driven by the gphoto2 shell
#[derive(Parser)]
#[command(name = "stopmotion")]
#[command(version)]
#[command(about = "Live preview and capture for cameras driven by the gphoto2 shell")]
struct Cli {
    /// Output image file; previews and captures are written here
    output: PathBuf,

    /// Settings file (default: $XDG_CONFIG_HOME/stopmotion/stopmotion.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tool to run instead of the configured one
    #[arg(long)]
    program: Option<String>,

    /// Tool name at the start of its prompt
    #[arg(long)]
    prompt_tag: Option<String>,

    /// Minimum time between two previews, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Prints timestamped status lines to stdout.
struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn status(&self, message: &str) {
        println!("{}", format_status(message));
    }

    fn polling(&self, active: bool) {
        let state = if active { "started" } else { "stopped" };
        println!("{}", format_status(&format!("polling {}", state)));
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = config::load_settings(cli.config.as_deref())
        .map(|settings| {
            config::merge_settings(
                settings,
                SettingsOverrides {
                    program: cli.program,
                    prompt_tag: cli.prompt_tag,
                    interval_ms: cli.interval_ms,
                    command_timeout_ms: None,
                },
            )
        })
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        });

    let registry = Registry::new(&settings).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let key = cli.output.to_string_lossy().into_owned();
    let mut rename = AutoRename::watch(&cli.output, &settings.preview.thumbnail_prefix)
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        });

    let streamer = Streamer::new(
        registry.clone(),
        key,
        settings.preview.clone(),
        Arc::new(ConsoleSink),
    );

    eprintln!("Writing to {}", cli.output.display());
    eprintln!("Commands: start, stop, capture, quit");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        };

        let result = match line.trim() {
            "" => continue,
            "start" => streamer.start_polling(),
            "stop" => streamer.stop_polling(),
            "capture" => streamer.capture(),
            "quit" | "exit" => break,
            other => {
                eprintln!("Unknown command: {}", other);
                continue;
            }
        };
        if let Err(e) = result {
            println!("{}", format_status(&e.to_string()));
        }
    }

    registry.shutdown().await;
    rename.close();
}
