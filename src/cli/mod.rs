use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;

use crate::api;
use crate::config::challenges::ChallengeCatalog;
use crate::config::settings::Settings;
use crate::docker::client::DockerDriver;
use crate::registry::lifecycle::Lifecycle;
use crate::utils::paths;

#[derive(Parser)]
#[command(name = "instancer")]
#[command(version)]
#[command(about = "Registry and lifecycle tracker for on-demand challenge containers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write default settings and a sample challenge catalog
    Init {
        /// Overwrite existing configuration files
        #[arg(long)]
        force: bool,
    },

    /// List configured challenges
    Challenges {
        /// Output as JSON (for programmatic use)
        #[arg(long)]
        json: bool,
    },

    /// Run the dashboard API and the expiry sweeper
    Serve {
        /// Listen address (overrides the settings file)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Init { force } => init(force),
            Commands::Challenges { json } => challenges(json),
            Commands::Serve { bind } => serve(bind).await,
        }
    }
}

fn init(force: bool) -> Result<()> {
    let settings_path = paths::get_settings_file()?;
    if settings_path.exists() && !force {
        println!("Settings already exist: {}", settings_path.display());
    } else {
        Settings::default().save_to(&settings_path)?;
        println!("Wrote {}", settings_path.display());
    }

    let challenges_path = paths::get_challenges_file()?;
    if challenges_path.exists() && !force {
        println!("Challenge catalog already exists: {}", challenges_path.display());
    } else {
        ChallengeCatalog::sample().save_to(&challenges_path)?;
        println!("Wrote {}", challenges_path.display());
    }

    Ok(())
}

fn challenges(json: bool) -> Result<()> {
    let catalog = ChallengeCatalog::load()?;
    let entries = catalog.iter_sorted();

    if json {
        let out: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, c)| {
                serde_json::json!({
                    "id": id,
                    "name": c.name,
                    "image": c.image,
                    "ports": c.internal_ports(),
                    "lifetime_secs": c.lifetime_secs,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No challenges configured. Run 'instancer init' for a sample catalog.");
        return Ok(());
    }

    for (id, challenge) in entries {
        let ports = challenge
            .ports
            .iter()
            .map(|p| match &p.label {
                Some(label) => format!("{} ({})", p.port, label),
                None => p.port.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:>5}  {}  image={}  ports=[{}]  lifetime={}s",
            id,
            challenge.name.bold(),
            challenge.image,
            ports,
            challenge.lifetime_secs
        );
    }

    Ok(())
}

async fn serve(bind: Option<String>) -> Result<()> {
    let settings = Settings::load()?;
    let catalog = ChallengeCatalog::load()?;

    let driver = DockerDriver::new().await?;
    let bind = bind.unwrap_or_else(|| settings.bind.clone());
    let sweep_interval = settings.sweep_interval_secs;

    let lifecycle = Arc::new(Lifecycle::new(Arc::new(driver), catalog, settings));

    api::server::run(lifecycle, &bind, sweep_interval).await
}
