//! Sheetflow CLI - run tabular flows from a workspace document.

mod analyze;
mod report;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "sheetflow")]
#[command(about = "Run sheetflow workspaces over CSV workbooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the flow reaching an Output node
    Run {
        /// Path to the workspace JSON document
        workspace: PathBuf,

        /// Id of the Output node to execute
        #[arg(short, long)]
        target: String,

        /// Output path (overrides the node's outputPath)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output workbook format
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        /// Test mode: limit rows per sheet and write nothing
        #[arg(long)]
        test: bool,

        /// Row limit per sheet in test mode
        #[arg(long, default_value_t = 100)]
        max_rows: usize,

        /// Run branches in parallel
        #[arg(long)]
        parallel: bool,

        /// Skip the data cleaner
        #[arg(long)]
        no_clean: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the execution branches of a flow without running it
    Analyze {
        /// Path to the workspace JSON document
        workspace: PathBuf,

        /// Id of the Output node
        #[arg(short, long)]
        target: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// One `<sheet>.csv` per sheet in a directory
    Csv,
    /// A single JSON document
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            workspace,
            target,
            output,
            format,
            test,
            max_rows,
            parallel,
            no_clean,
            json,
        } => {
            let options = run::RunOptions {
                output,
                format,
                test,
                max_rows,
                parallel,
                clean: !no_clean,
                json,
            };
            let success = run::execute(&workspace, &target, &options)?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Analyze { workspace, target } => analyze::execute(&workspace, &target)?,
    }

    Ok(())
}
