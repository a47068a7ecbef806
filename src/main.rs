mod config;
mod serve;
mod signals;
mod supervisor;

use clap::Parser;
use config::Credentials;
use std::path::PathBuf;

/// Local control panel for the Asa voice-interview agent: serves a single
/// page with a status indicator and start/stop controls for the agent
/// subprocess.
#[derive(Parser, Debug)]
#[command(name = "asa-panel", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "asa-panel.toml")]
    config: PathBuf,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Validate config and print resolved settings, don't serve
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (liveness checks, signal delivery)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "asa_panel=debug"
    } else if cli.quiet {
        "asa_panel=warn"
    } else {
        "asa_panel=info"
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        config.panel.bind = bind;
    }
    if let Some(port) = cli.port {
        config.panel.port = port;
    }

    let credentials = Credentials::from_env();
    if !credentials.is_complete() {
        tracing::warn!(
            "credentials missing ({} / {}); panel will show setup instructions",
            config::AGENT_ID_VAR,
            config::API_KEY_VAR
        );
    }

    if cli.dry_run {
        println!("asa-panel v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file:   {}", cli.config.display());
        println!(
            "Agent command: {} {}",
            config.agent.command,
            config.agent.args.join(" ")
        );
        println!("Working dir:   {}", config.agent.working_dir.display());
        println!("Agent log:     {}", config.agent.log_file.display());
        println!("Listen on:     {}:{}", config.panel.bind, config.panel.port);
        println!("Poll interval: {}ms", config.panel.poll_interval_ms);
        println!(
            "Credentials:   {}",
            if credentials.is_complete() {
                "present"
            } else {
                "missing"
            }
        );
        return;
    }

    if let Err(e) = serve::run(&config, &credentials).await {
        tracing::error!("panel server failed: {e}");
        std::process::exit(1);
    }
}
