use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use datalayer_core::{ConnectOptions, DataLayer, Profile, ProfileStore};
use log::{info, LevelFilter};

use super::shell;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "datalayer", version, subcommand_required = true)]
pub struct Args {
    /// Default log level; RUST_LOG overrides it
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage saved connection profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Open an interactive shell over the in-memory store
    Shell(ShellArgs),
}

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// List saved profiles
    List,
    /// Create or overwrite a profile
    Save {
        /// Profile name
        #[arg(long)]
        name: String,
        #[command(flatten)]
        options: OptionArgs,
        /// Username
        #[arg(long, default_value = "admin")]
        user: String,
        /// Password
        #[arg(long, default_value = "")]
        password: String,
        /// Connect timeout in seconds
        #[arg(long, default_value_t = 20)]
        timeout: u64,
    },
    /// Delete a profile
    Delete {
        /// Profile name
        name: String,
    },
}

#[derive(ClapArgs, Debug)]
pub struct OptionArgs {
    /// Store host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Store port
    #[arg(long, default_value_t = 28015)]
    port: u16,
    /// Default database
    #[arg(long)]
    db: Option<String>,
}

impl OptionArgs {
    fn into_options(self) -> ConnectOptions {
        ConnectOptions {
            db: self.db,
            ..ConnectOptions::new(self.host, self.port)
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ShellArgs {
    /// Connect with a saved profile instead of the flags below
    #[arg(long, conflicts_with_all = ["host", "port", "db"])]
    profile: Option<String>,
    #[command(flatten)]
    options: OptionArgs,
}

pub async fn run_cli(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Profile { action } => run_profile_action(action, &ProfileStore::new()?),
        Command::Shell(shell_args) => run_shell(shell_args).await,
    }
}

fn run_profile_action(action: ProfileAction, store: &ProfileStore) -> anyhow::Result<()> {
    match action {
        ProfileAction::List => {
            let profiles = store.list()?;
            if profiles.is_empty() {
                println!("No profiles in {}", store.dir().display());
            }
            for profile in profiles {
                let db = profile.options.db.as_deref().unwrap_or("-");
                println!(
                    "{:<16} {:<24} db={}",
                    profile.name,
                    profile.options.address(),
                    db
                );
            }
        }
        ProfileAction::Save {
            name,
            options,
            user,
            password,
            timeout,
        } => {
            let options = ConnectOptions {
                user,
                password,
                timeout,
                ..options.into_options()
            };
            store.save(&Profile::new(name.clone(), options))?;
            info!("Saved profile '{}'.", name);
        }
        ProfileAction::Delete { name } => {
            if !store.delete(&name)? {
                bail!("no profile named '{name}'");
            }
            info!("Deleted profile '{}'.", name);
        }
    }
    Ok(())
}

async fn run_shell(args: ShellArgs) -> anyhow::Result<()> {
    let options = match args.profile {
        Some(name) => {
            ProfileStore::new()?
                .get(&name)?
                .with_context(|| format!("no profile named '{name}'"))?
                .options
        }
        None => args.options.into_options(),
    };

    info!("Opening shell against {}.", options.address());
    let data_layer = DataLayer::in_memory(options)
        .acquire()
        .await
        .context("could not open the session")?;
    shell::run(&data_layer).await
}
