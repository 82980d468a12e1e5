use std::{
    path::{Path, PathBuf},
    process,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

mod manifest;
mod routes;
mod run;

use manifest::Manifest;

#[derive(Clone, Debug)]
pub struct Context {
    /// Directory containing the manifest
    pub manifest_dir: PathBuf,
    pub manifest: Manifest,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Storefront payments backend", long_about = None)]
struct Opts {
    /// Path to the storefront.yaml manifest file
    #[arg(
        long = "manifest-path",
        short = 'm',
        global = true,
        default_value = "./storefront.yaml"
    )]
    manifest_path: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Start the API server and the payment triggers
    Run(run::RunCommand),
    /// List the storefront routes or resolve a path
    Routes(routes::RoutesCommand),
}

#[tokio::main]
async fn main() {
    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    let manifest_dir = opts
        .manifest_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    load_env_file(&manifest_dir);

    let manifest = match Manifest::load(&opts.manifest_path) {
        Ok(manifest) => {
            eprintln!("✓ Loaded manifest from {}", opts.manifest_path.display());
            manifest
        }
        Err(e) => {
            eprintln!("Warning: {}", e);
            eprintln!("Using default configuration...");
            Manifest::default()
        }
    };

    let ctx = Context {
        manifest_dir,
        manifest,
    };

    if let Err(e) = handle_command(opts.command, &ctx).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Load environment variables from the .env file next to the manifest
fn load_env_file(manifest_dir: &Path) {
    let env_file_path = manifest_dir.join(".env");

    match dotenvy::from_path(&env_file_path) {
        Ok(_) => {
            eprintln!("✓ Loaded environment from {}", env_file_path.display());
        }
        Err(e) if e.not_found() => {}
        Err(e) => {
            eprintln!(
                "Warning: Failed to load .env file at {}: {}",
                env_file_path.display(),
                e
            );
        }
    }
}

async fn handle_command(command: Command, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Command::Run(cmd) => cmd
            .execute(ctx)
            .await
            .with_context(|| format!("storefront run ({})", ctx.manifest_dir.display())),
        Command::Routes(cmd) => cmd.execute().map_err(anyhow::Error::msg),
    }
}
