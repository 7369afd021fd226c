//! Gitalong - Git coordination for non-mergeable files
//!
//! Run with `gitalong --help` for usage.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitalong::repository::{ClaimStatus, FileStatus, ReleaseStatus};
use gitalong::setup::SetupOptions;
use gitalong::{Error, Repository, APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Prevent concurrent edits to non-mergeable files across a Git team")]
#[command(long_about = None)]
struct Cli {
    /// Repository to apply operations to (defaults to the current directory)
    #[arg(short = 'C', long = "repository", global = true)]
    repository: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up gitalong in a repository
    Setup {
        /// Store locator: a Git remote or an HTTP JSON-document URL
        store_url: String,

        /// Manage permissions of tracked files (read-only unless claimed)
        #[arg(long)]
        modify_permissions: bool,

        /// Comma-separated list of extensions to track
        #[arg(long, value_delimiter = ',')]
        tracked_extensions: Vec<String>,

        /// Publish uncommitted changes to the store
        #[arg(long)]
        track_uncommitted: bool,

        /// Append the store directory to .gitignore
        #[arg(long)]
        update_gitignore: bool,

        /// Install hooks that run `gitalong update`
        #[arg(long)]
        update_hooks: bool,

        /// Store header as KEY=VALUE; `$NAME` values resolve from the
        /// environment at request time (repeatable)
        #[arg(long = "store-header", value_parser = parse_key_value)]
        store_headers: Vec<(String, String)>,

        /// Seconds between store refreshes
        #[arg(long, default_value_t = 60.0)]
        pull_threshold: f64,
    },

    /// Publish this clone's local state to the store
    Update,

    /// Print spread, commit, and publisher information per file
    Status {
        /// Files to report on
        paths: Vec<String>,
    },

    /// Reserve files for exclusive editing
    Claim {
        /// Files to claim
        paths: Vec<String>,
    },

    /// Give up claims on files
    Release {
        /// Files to release
        paths: Vec<String>,
    },

    /// Print a configuration property value
    Config {
        /// Property name, e.g. `store-url` or `track-uncommitted`
        property: String,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn setup_logging(debug: bool) -> eyre::Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn").add_directive("gitalong=info".parse()?)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    setup_logging(cli.debug)?;

    match run(cli).await {
        Ok(code) => Ok(code),
        Err(err) => {
            eprintln!("{APP_NAME}: {}: {}", err.kind(), err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Error> {
    let root = match &cli.repository {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Setup {
            store_url,
            modify_permissions,
            tracked_extensions,
            track_uncommitted,
            update_gitignore,
            update_hooks,
            store_headers,
            pull_threshold,
        } => {
            gitalong::setup::setup(
                &root,
                SetupOptions {
                    store_url,
                    store_headers: store_headers.into_iter().collect::<BTreeMap<_, _>>(),
                    modify_permissions,
                    tracked_extensions,
                    track_uncommitted,
                    pull_threshold,
                    update_gitignore,
                    update_hooks,
                },
            )
            .await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Update => {
            let repository = Repository::find(&root).await?;
            repository.update().await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status { paths } => {
            let repository = Repository::find(&root).await?;
            for status in repository.statuses(&paths).await? {
                println!("{status}");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Claim { paths } => {
            let repository = Repository::find(&root).await?;
            let statuses = repository.claim(&paths).await?;
            let identity = repository.identity().clone();
            let active = repository.active_branch().await?;

            let mut all_granted = true;
            for (path, status) in paths.iter().zip(&statuses) {
                match status {
                    ClaimStatus::Granted => {
                        println!("{}", FileStatus::new(path.clone(), None, &identity, None));
                    }
                    ClaimStatus::Blocked(record) => {
                        all_granted = false;
                        println!(
                            "{}",
                            FileStatus::new(
                                path.clone(),
                                Some(record.as_ref().clone()),
                                &identity,
                                active.as_deref()
                            )
                        );
                    }
                    ClaimStatus::Unwritable(file) => {
                        all_granted = false;
                        eprintln!(
                            "{APP_NAME}: PermissionDenied: cannot make {} writable",
                            file.display()
                        );
                    }
                }
            }
            Ok(exit_for(all_granted))
        }

        Commands::Release { paths } => {
            let repository = Repository::find(&root).await?;
            let statuses = repository.release(&paths).await?;
            let identity = repository.identity().clone();
            let active = repository.active_branch().await?;

            let mut all_released = true;
            for (path, status) in paths.iter().zip(&statuses) {
                match status {
                    ReleaseStatus::Released => {
                        println!("{}", FileStatus::new(path.clone(), None, &identity, None));
                    }
                    ReleaseStatus::ModifiedLocally(record) => {
                        all_released = false;
                        println!(
                            "{}",
                            FileStatus::new(
                                path.clone(),
                                Some(record.as_ref().clone()),
                                &identity,
                                active.as_deref()
                            )
                        );
                    }
                }
            }
            Ok(exit_for(all_released))
        }

        Commands::Config { property } => {
            let repository = Repository::find(&root).await?;
            let document = serde_json::to_value(repository.config())
                .expect("configuration always serializes");
            let key = property.replace('-', "_");
            match document.get(&key) {
                Some(serde_json::Value::String(value)) => println!("{value}"),
                Some(serde_json::Value::Bool(value)) => println!("{value}"),
                Some(value) => println!("{value}"),
                None => {}
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_for(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
