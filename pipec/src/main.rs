mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use commands::compile::CompileArgs;
use commands::eval::EvalArgs;
use commands::validate::ValidateArgs;

/// Compile-time template expansion and policy enforcement for YAML pipelines
#[derive(Parser, Debug)]
#[command(name = "pipec", version, about, long_about = None)]
struct Cli {
    /// Log template loading and directive evaluation
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand a pipeline and print the result
    Compile(CompileArgs),

    /// Check that a pipeline expands and satisfies policy
    Validate(ValidateArgs),

    /// Evaluate a compile-time expression
    Eval(EvalArgs),
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Command::Compile(args) => commands::compile::execute(args),
        Command::Validate(args) => commands::validate::execute(args),
        Command::Eval(args) => commands::eval::execute(args),
    }
}

/// `PIPEC_LOG` sets the filter; `--verbose` forces `debug`.
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_new("debug")?
    } else {
        EnvFilter::try_from_env("PIPEC_LOG").or_else(|_| EnvFilter::try_new("warn"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}
