mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_DEFINITION_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "fabric",
    version,
    about = "Manage profile versions and profiles, and dry-run container provisioning"
)]
struct Cli {
    /// Path to the profile registry directory.
    #[arg(long, default_value = "~/.local/share/fabric", global = true)]
    store: String,

    /// Path to a fabric.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List profile versions.
    Versions,
    /// Create a profile version.
    AddVersion {
        /// Version number, e.g. "1.2".
        version: String,
        /// Copy all profiles of this version into the new one.
        #[arg(long)]
        from: Option<String>,
    },
    /// Remove a profile version that no container uses.
    RemoveVersion {
        version: String,
    },
    /// List the profiles of a version.
    Profiles {
        version: String,
    },
    /// Show one profile as stored.
    Show {
        version: String,
        profile: String,
    },
    /// Import profiles from TOML definition files.
    Import {
        /// Definition files.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Version for definitions that do not name one.
        #[arg(long)]
        version: Option<String>,
        /// Replace profiles that already exist.
        #[arg(long, default_value_t = false)]
        update: bool,
    },
    /// Remove a profile no other profile or container depends on.
    RemoveProfile {
        version: String,
        profile: String,
    },
    /// Show the effective (inherited and merged) profile.
    Effective {
        version: String,
        /// One profile, or several in assignment order.
        #[arg(required = true)]
        profiles: Vec<String>,
    },
    /// Provision a throwaway container and report what would be installed.
    Provision {
        version: String,
        #[arg(required = true)]
        profiles: Vec<String>,
        /// Runtime type to match configuration directives against.
        #[arg(long)]
        runtime: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("FABRIC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        return exit_code(commands::completions::run::<Cli>(shell));
    }

    let ctx = match Context::load(expand_tilde(&cli.store), cli.config.as_deref(), cli.json) {
        Ok(ctx) => ctx,
        Err(msg) => return exit_code(Err(msg)),
    };

    let result = match cli.command {
        Commands::Versions => commands::versions::list(&ctx),
        Commands::AddVersion { version, from } => {
            commands::versions::add(&ctx, &version, from.as_deref())
        }
        Commands::RemoveVersion { version } => commands::versions::remove(&ctx, &version),
        Commands::Profiles { version } => commands::profiles::list(&ctx, &version),
        Commands::Show { version, profile } => commands::profiles::show(&ctx, &version, &profile),
        Commands::Import {
            files,
            version,
            update,
        } => commands::import::run(&ctx, &files, version.as_deref(), update),
        Commands::RemoveProfile { version, profile } => {
            commands::profiles::remove(&ctx, &version, &profile)
        }
        Commands::Effective { version, profiles } => {
            commands::effective::run(&ctx, &version, &profiles)
        }
        Commands::Provision {
            version,
            profiles,
            runtime,
        } => commands::provision::run(&ctx, &version, &profiles, runtime.as_deref()),
        Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
    };
    exit_code(result)
}

fn exit_code(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("profile error:") {
                EXIT_DEFINITION_ERROR
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
