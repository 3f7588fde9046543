mod chat;
mod server;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use dialogpress_core::config::{get_settings, mask_secret, Paths};
use dialogpress_core::logging::init_logging;
use dialogpress_core::types::Settings;
use dialogpress_engine::{Engine, SessionHandle, YandexGptClient};

#[derive(Parser)]
#[command(name = "dialogpress", about = "dialogpress - conversation history compression for LLM chats")]
struct Cli {
    /// Log at DEBUG level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Port to listen on (defaults to server.port in settings)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Interactive chat in the terminal
    Chat,
    /// Run the scripted self-test once and print the report
    Selftest {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective settings
    Config,
}

fn resolve_paths() -> Paths {
    let working_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Paths::resolve(&working_dir)
}

fn build_engine(settings: Settings) -> Result<Engine> {
    let client = YandexGptClient::new(&settings.provider, settings.pricing.clone())?;
    Ok(Engine::new(Arc::new(client), settings))
}

fn show_config(paths: &Paths, settings: &Settings) -> Result<()> {
    let mut shown = settings.clone();
    if let Some(key) = shown.provider.api_key.as_deref() {
        shown.provider.api_key = Some(mask_secret(key));
    }
    println!("  Home:     {}", paths.home.display().to_string().bright_white());
    println!("  Settings: {}", paths.settings_file.display().to_string().dimmed());
    println!("  Log:      {}", paths.log_file.display().to_string().dimmed());
    println!();
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = resolve_paths();
    paths.ensure_log_dir()?;
    init_logging(&paths.log_file, cli.verbose)?;
    let settings = get_settings(&paths.settings_file)?;

    match cli.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(settings.server.port);
            server::start_server(build_engine(settings)?, port)
        }
        Some(Commands::Selftest { json }) => {
            let engine = build_engine(settings)?;
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(engine.run_test(&SessionHandle::new()));
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                chat::print_report(&report);
            }
            Ok(())
        }
        Some(Commands::Config) => show_config(&paths, &settings),
        Some(Commands::Chat) | None => {
            let engine = build_engine(settings)?;
            let rt = tokio::runtime::Runtime::new()?;
            chat::run_chat(&engine, &rt)
        }
    }
}
