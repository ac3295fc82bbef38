//! `mesh` binary entrypoint.
//!
//! Loads the declarative mesh document and drives every member host toward
//! the declared state over SSH. Exit code 0 on success, 1 on failure;
//! transition logging goes to stderr.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wgmesh_core::{Mesh, Toggle};
use wgmesh_remote::{SshDialer, SshTransport};

mod cli;
mod load;

use cli::{Cli, Commands};

fn init_tracing(quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(false)
        .without_time();
    if quiet {
        builder.with_writer(io::sink).init();
    } else {
        builder.with_writer(io::stderr).init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let quiet = cli.quiet;
    init_tracing(quiet);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            if !quiet {
                eprintln!("Failed to create async runtime: {e}");
            }
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            if !quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let spec = load::load_mesh(&cli.file, cli.json)?;
    let dialer = SshDialer::default();
    let mut mesh: Mesh<SshTransport> = Mesh::open(spec, &dialer).await?;

    let code = match cli.command {
        Commands::Up { info } => {
            if mesh.up(Toggle::Auto).await? == Some(true) {
                if info {
                    print_info(&mesh, cli.json_out).await?;
                }
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Down { remove } => {
            if mesh.down(Toggle::from_flag(remove)).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Sync => {
            if mesh.sync(Toggle::Auto).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Show => {
            print!("{}", mesh.show().await);
            ExitCode::SUCCESS
        }
        Commands::Info => {
            print_info(&mesh, cli.json_out).await?;
            ExitCode::SUCCESS
        }
        Commands::Conf => {
            mesh.peer_all().await?;
            for node in mesh.nodes() {
                println!("# {} ({})", node.name(), node.remote().interface());
                println!("{}", node.config().to_wgquick());
            }
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

async fn print_info(mesh: &Mesh<SshTransport>, json_out: bool) -> anyhow::Result<()> {
    let info = mesh.info().await;
    if json_out {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print!("{}", serde_yaml::to_string(&info)?);
    }
    Ok(())
}
