//! Configuration file management.

use std::path::Path;

use clap::{Args, Subcommand};
use portjack_config::{BackendConfig, default_config_path, find_config};

use super::common;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = common::load_config(config_path)?;
            match find_config(config_path) {
                Some(path) => println!("# {}", path.display()),
                None => println!("# defaults (no configuration file found)"),
            }
            print!("{}", config.to_toml()?);
        }

        ConfigCommand::Init { force } => {
            let target = config_path.map_or_else(default_config_path, Path::to_path_buf);
            if target.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    target.display()
                );
            }
            BackendConfig::default().save(&target)?;
            println!("Wrote {}", target.display());
        }
    }

    Ok(())
}
