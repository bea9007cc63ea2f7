mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, EnvAction};

fn main() -> Result<()> {
    splatkit_core::observability::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Env { action } => match action {
            EnvAction::Status { json } => commands::env::cmd_status(json)?,
            EnvAction::Install => commands::env::cmd_install()?,
            EnvAction::Clean { dry_run, force } => commands::env::cmd_clean(dry_run, force)?,
            EnvAction::Path => commands::env::cmd_path()?,
        },
        Commands::Predict {
            image,
            output,
            device,
            checkpoint,
            timeout,
            verbose,
            splat,
            json,
        } => {
            let opts = commands::predict::PredictOptions {
                image,
                output,
                device,
                checkpoint,
                timeout,
                verbose,
                splat,
                json,
            };
            commands::predict::cmd_predict(opts)?;
        }
        Commands::Validate { ply, json } => commands::artifact::cmd_validate(&ply, json)?,
        Commands::Convert {
            ply,
            out,
            standard_ply,
        } => commands::artifact::cmd_convert(&ply, out.as_deref(), standard_ply.as_deref())?,
    }

    Ok(())
}
