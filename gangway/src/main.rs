//! Gangway - Entry Point
//!
//! Deploys MCP tool servers onto isolated machines and bridges clients to
//! them over Streamable HTTP.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use gangway::app::options::AppOptions;
use gangway::app::run::run;
use gangway::filesys::file::File;
use gangway::logs::{init_logging, LogOptions};
use gangway::storage::layout::StorageLayout;
use gangway::storage::settings::Settings;
use gangway::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(PathBuf::from(dir)),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.settings_file(),
    };
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the gateway
    let options = AppOptions::from_settings(&settings, layout);

    info!(
        "Running Gangway {} ({}) on {}:{}",
        version.version, version.git_hash, options.server.host, options.server.port
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the gateway: {e}");
        std::process::exit(1);
    }
}

/// Read the settings file if present, apply environment overrides, validate
async fn load_settings(file: &File) -> anyhow::Result<Settings> {
    let mut settings = if file.exists().await {
        file.read_json::<Settings>()
            .await
            .with_context(|| format!("reading {}", file.path().display()))?
    } else {
        Settings::default()
    };

    settings.apply_env_overrides();
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
