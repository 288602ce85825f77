use {anyhow::Result, clap::Subcommand};

use chatrelay_config::{
    RelayConfig, default_token_url, discover_and_load, find_config_file,
    find_or_default_config_path, save_config,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the config file in use.
    Path,
    /// Write a config file with every default filled in.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print enabled platforms from the effective config.
    Check,
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            match find_config_file() {
                Some(path) => println!("{}", path.display()),
                None => println!(
                    "No config file found; defaults apply. Create one at {}",
                    find_or_default_config_path().display()
                ),
            }
            Ok(())
        },
        ConfigAction::Init { force } => init(force),
        ConfigAction::Check => {
            let config = discover_and_load();
            let enabled = config.enabled_platforms();
            if enabled.is_empty() {
                println!("No platforms enabled.");
            }
            for platform in enabled {
                let credential = if default_token_url(platform).is_none() {
                    "no credential needed"
                } else if config.oauth_client(platform).is_some() {
                    "oauth client configured"
                } else {
                    "no oauth client, tokens will not be refreshed"
                };
                println!("  {:<10} {credential}", platform.as_str());
            }
            println!(
                "Operator API on {}:{}",
                config.server.bind, config.server.port
            );
            Ok(())
        },
    }
}

fn init(force: bool) -> Result<()> {
    let path = find_or_default_config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    save_config(&RelayConfig::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
