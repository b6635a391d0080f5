//! netfleet - command line entry point.
//!
//! Usage: netfleet [--config PATH] [--transcript FILE] <COMMAND>
//!
//! Every command prints JSON on stdout. With `--transcript`, SSH sessions are
//! replayed from a TOML file instead of reaching the network.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use netfleet::config::Config;
use netfleet::exec::CommandExecutor;
use netfleet::logging;
use netfleet::probe::{DeviceProber, SignatureTable};
use netfleet::registry::{CredentialBook, DeviceRegistry, NewDevice};
use netfleet::ssh::{Ssh2Connector, SshConnector, TranscriptConnector};
use netfleet::store::{DocumentStore, FileStore};
use netfleet::vault::{CredentialCipher, KeyVault};

#[derive(Parser)]
#[command(name = "netfleet")]
#[command(author, version, about = "Network device fleet management over SSH", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.netfleet/config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Replay SSH sessions from a TOML transcript
    #[arg(long, global = true)]
    transcript: Option<PathBuf>,
}

/// Password taken from the command line or the environment.
#[derive(clap::Args)]
struct PasswordArg {
    /// Login password
    #[arg(long, env = "NETFLEET_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify vendor, model and version of a host
    Identify {
        host: String,
        #[arg(short, long)]
        username: String,
        #[command(flatten)]
        password: PasswordArg,
    },

    /// Run commands on a host
    Exec {
        host: String,
        #[arg(short, long)]
        username: String,
        #[command(flatten)]
        password: PasswordArg,
        /// Commands, run in order
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Manage registered devices
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Manage stored credentials
    Cred {
        #[command(subcommand)]
        action: CredAction,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// Register a device
    Add {
        name: String,
        ip: String,
        #[arg(short, long)]
        username: String,
        #[command(flatten)]
        password: PasswordArg,
        /// Operator-assigned role
        #[arg(long, default_value = "firewall")]
        device_type: String,
    },
    /// List devices
    List,
    /// Remove a device by id
    Remove { device_id: String },
    /// Run commands on a registered device
    Exec {
        name: String,
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Group device addresses by /24
    Networks,
}

#[derive(Subcommand)]
enum CredAction {
    /// Store a credential
    Add {
        username: String,
        #[command(flatten)]
        password: PasswordArg,
    },
    /// Print a stored password
    Get { username: String },
    /// List stored usernames
    List,
    /// Delete a credential and its key
    Remove { username: String },
}

/// Components built once from the configuration.
struct Context {
    store: Arc<dyn DocumentStore>,
    cipher: CredentialCipher,
    prober: DeviceProber,
    executor: CommandExecutor,
}

impl Context {
    fn build(
        config: &Config,
        transcript: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let connector: Arc<dyn SshConnector> = match transcript {
            Some(path) => Arc::new(TranscriptConnector::load_file(path)?),
            None => Arc::new(Ssh2Connector::new()),
        };

        let signatures = match config.signatures_file {
            Some(ref path) => SignatureTable::with_overrides(SignatureTable::load_file(path)?),
            None => SignatureTable::builtin(),
        };

        let settings = config.ssh_settings();
        let store: Arc<dyn DocumentStore> = Arc::new(FileStore::new(config.store_path.clone()));
        let cipher = CredentialCipher::new(KeyVault::new(store.clone(), config.vault_config()));

        Ok(Self {
            store,
            cipher,
            prober: DeviceProber::new(connector.clone(), settings, signatures),
            executor: CommandExecutor::new(connector, settings),
        })
    }

    fn devices(self) -> DeviceRegistry {
        DeviceRegistry::new(self.store, self.cipher, self.prober, self.executor)
    }

    fn credentials(self) -> CredentialBook {
        CredentialBook::new(self.store, self.cipher)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Err(e) = logging::init(&config.log_config()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    info!("netfleet v{} starting", env!("CARGO_PKG_VERSION"));

    let ctx = Context::build(&config, cli.transcript.as_deref())?;

    match cli.command {
        Commands::Identify {
            host,
            username,
            password,
        } => {
            let profile = ctx.prober.identify(&host, &username, &password.password)?;
            print_json(&profile)
        }
        Commands::Exec {
            host,
            username,
            password,
            commands,
        } => {
            let report =
                ctx.executor
                    .execute_all(&host, &username, &password.password, &commands)?;
            print_json(&report)
        }
        Commands::Device { action } => {
            let registry = ctx.devices();
            match action {
                DeviceAction::Add {
                    name,
                    ip,
                    username,
                    password,
                    device_type,
                } => {
                    let record = registry.add_device(NewDevice {
                        name,
                        ip,
                        device_type,
                        username,
                        password: password.password,
                    })?;
                    print_json(&record)
                }
                DeviceAction::List => print_json(&registry.list_devices()?),
                DeviceAction::Remove { device_id } => {
                    let removed = registry.remove_device(&device_id)?;
                    print_json(&json!({ "device_id": device_id, "removed": removed }))
                }
                DeviceAction::Exec { name, commands } => {
                    print_json(&registry.execute(&name, &commands)?)
                }
                DeviceAction::Networks => print_json(&registry.networks()?),
            }
        }
        Commands::Cred { action } => {
            let book = ctx.credentials();
            match action {
                CredAction::Add { username, password } => {
                    let owner_id = book.add(&username, &password.password)?;
                    print_json(&json!({ "username": username, "owner_id": owner_id }))
                }
                CredAction::Get { username } => {
                    let password = book.get(&username)?;
                    print_json(&json!({ "username": username, "password": password }))
                }
                CredAction::List => print_json(&book.list()?),
                CredAction::Remove { username } => {
                    let removed = book.delete(&username)?;
                    print_json(&json!({ "username": username, "removed": removed }))
                }
            }
        }
    }
}
