//! Shipyard - Entry Point
//!
//! Runs a deploy pipeline against the hosts of an inventory file.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use shipyard::app::options::AppOptions;
use shipyard::app::run::{build_recipe, list_tasks, print_report, run};
use shipyard::context::Input;
use shipyard::filesys::file::File;
use shipyard::inventory::Settings;
use shipyard::logs::{init_logging, LogOptions};
use shipyard::utils::version_info;

use tracing::{error, info};

/// Flags forwarded to tasks as input options
const INPUT_FLAGS: [&str; 4] = ["tag", "branch", "revision", "force-unlock"];

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut extra_options: Vec<(String, String)> = Vec::new();
    let mut positional: Vec<String> = Vec::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=').filter(|_| arg.starts_with("--")) {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            if clean_key == "option" {
                if let Some((name, value)) = value.split_once(':') {
                    extra_options.push((name.to_string(), value.to_string()));
                } else {
                    eprintln!("Ignoring malformed --option={value}, expected name:value");
                }
                continue;
            }
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        } else {
            positional.push(arg.clone());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Unable to render version info: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the inventory file
    let inventory = cli_args
        .get("inventory")
        .map(PathBuf::from)
        .unwrap_or_else(|| AppOptions::default().inventory);
    let settings = match Settings::load(&File::new(inventory.clone())).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read inventory {}: {e}", inventory.display());
            return ExitCode::from(2);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // List tasks and exit
    if cli_args.contains_key("list") {
        return match build_recipe(&settings) {
            Ok(recipe) => {
                for (name, description) in list_tasks(&recipe) {
                    println!("{name:<24} {description}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Invalid recipe: {e}");
                ExitCode::from(2)
            }
        };
    }

    let mut input = Input::new();
    for flag in INPUT_FLAGS {
        if let Some(value) = cli_args.get(flag) {
            input = input.with_option(flag, value);
        }
    }
    for (name, value) in &extra_options {
        input = input.with_option(name, value);
    }

    let mut options = AppOptions::from_settings(&settings);
    options.inventory = inventory;
    options.input = input;
    if let Some(pipeline) = positional.first() {
        options.pipeline = pipeline.clone();
    }
    if let Some(hosts) = cli_args.get("hosts") {
        options.hosts = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(limit) = cli_args.get("limit") {
        match limit.parse::<usize>() {
            Ok(limit) if limit > 0 => options.scheduler.max_concurrency = limit,
            _ => {
                error!("--limit must be a positive integer, got {limit}");
                return ExitCode::from(2);
            }
        }
    }
    if let Some(label) = cli_args.get("label") {
        match label.split_once(':') {
            Some((key, value)) => options.label = Some((key.to_string(), value.to_string())),
            None => {
                error!("--label must look like key:value, got {label}");
                return ExitCode::from(2);
            }
        }
    }
    if cli_args.contains_key("no-color") {
        options.decorated = false;
    }

    info!("Running shipyard with options: {:?}", options);
    match run(options, settings, await_shutdown_signal()).await {
        Ok(report) => {
            print_report(&report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!("Failed to run: {e}");
            ExitCode::from(2)
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
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
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
