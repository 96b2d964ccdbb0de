mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use lc_core::config::{AutoStartConfig, Config};
use lc_server::StartOptions;
use tokio_util::sync::CancellationToken;

fn apply_overrides(config: &mut Config, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}

fn serve(config: Config, options: StartOptions) -> Result<()> {
    tracing::info!("Starting loopcast");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(lc_server::start(config, options, CancellationToken::new()))?;
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = lc_av::ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Install it or set tools.ffmpeg_path.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Media dir: {}", config.media.dir.display());
    println!("  Endpoint: {}", config.stream.endpoint_template);
    println!("  Auto-start: {}", config.autostart.is_some());

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "loopcast=trace,lc_server=trace,lc_av=trace,lc_core=debug,tower_http=debug".to_string()
        } else {
            "loopcast=debug,lc_server=debug,lc_av=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            apply_overrides(&mut config, host, port);
            serve(config, StartOptions::default())
        }
        Commands::Stream {
            media,
            key,
            shorts,
            host,
            port,
        } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            apply_overrides(&mut config, host, port);
            config.autostart = Some(AutoStartConfig { media, key, shorts });
            serve(config, StartOptions { echo_logs: true })
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("loopcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
