use anyhow::Result;

use super::compare::cmd_compare;
use super::config::cmd_config;
use super::env::CliArgs;
use super::info::{cmd_info, cmd_metrics};
use super::lookup::{cmd_meta, cmd_nearest};
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    let output = cli.output;
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx, output).await,
        Commands::Compare(args) => cmd_compare(args, ctx, output).await,
        Commands::Nearest(args) => cmd_nearest(args, ctx, output).await,
        Commands::Meta => cmd_meta(ctx, output).await,
        Commands::Config(args) => cmd_config(args, ctx, output).await,
        Commands::Info => cmd_info(ctx, output).await,
        Commands::Metrics => cmd_metrics(),
    }
}
