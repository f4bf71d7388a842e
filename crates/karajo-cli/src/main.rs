use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use karajo_core::Env;

/// Pre-flight checks run before a config file is trusted: the process
/// should not be root, and the file should not be readable/writable by
/// anyone else (it carries webhook secrets and bcrypt hashes).
mod security {
    use std::path::Path;

    pub fn check_not_root() -> std::result::Result<(), String> {
        #[cfg(unix)]
        {
            let uid = unsafe { libc::getuid() };
            if uid == 0 {
                return Err(
                    "refusing to run as root; karajo should run as a dedicated, unprivileged user"
                        .to_string(),
                );
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    pub fn check_config_permissions(path: &Path) -> std::result::Result<(), String> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)
            .map_err(|e| format!("cannot read config file {}: {e}", path.display()))?;
        let mode = metadata.permissions().mode();

        if mode & 0o002 != 0 {
            return Err(format!(
                "config file {} is world-writable; run `chmod 600 {}`",
                path.display(),
                path.display()
            ));
        }
        if mode & 0o004 != 0 {
            tracing::warn!(path = %path.display(), "config file is world-readable; consider chmod 600");
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn check_config_permissions(_path: &Path) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "karajo")]
#[command(about = "Long-running job manager: scheduled and webhook-triggered exec/HTTP jobs")]
#[command(version = karajo_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the INI configuration file (required unless running `version`).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job manager and its HTTP control plane (the default command).
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the version and exit.
    Version,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .map(String::from)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Some(Commands::Version) => {
            println!("karajo {}", karajo_core::VERSION);
            return Ok(());
        }
        Some(Commands::Run { config }) => {
            run(config.or(cli.config)).await?;
        }
        None => {
            run(cli.config).await?;
        }
    }

    Ok(())
}

async fn run(config: Option<PathBuf>) -> Result<()> {
    let Some(config_path) = config else {
        eprintln!("error: -config <file> is required to run karajo (see `karajo --help`)");
        std::process::exit(1);
    };

    if let Err(e) = security::check_not_root() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    if let Err(e) = security::check_config_permissions(&config_path) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let env = Env::load(&config_path.to_string_lossy())
        .with_context(|| format!("loading config file {}", config_path.display()))?;
    info!(
        version = karajo_core::VERSION,
        listen_address = %env.listen_address,
        exec_jobs = env.exec_jobs.len(),
        http_jobs = env.http_jobs.len(),
        "starting karajo"
    );

    let manager = karajo_core::build_manager(&env).context("wiring configured jobs into the manager")?;
    karajo_api::run(env, manager).await.context("running the control-plane server")?;
    Ok(())
}
