mod cli_common;
mod run_inference;
mod run_select;
mod run_train;

use clap::{Parser, Subcommand};
use log::info;
use run_inference::*;
use run_select::*;
use run_train::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Latent topic models with variational inference\n\
		  Documents are given in the sparse vector format \n\
		  (`[label] idx:count idx:count ...`) over a vocabulary file."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,

    #[arg(
        long,
        short,
        global = true,
        help = "Verbosity",
        long_help = "Enable verbose output.\n\
		     Prints additional information during execution."
    )]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a topic model with one configuration",
        long_about = "Train a topic model for a fixed number of epochs\n\
		      using a configuration instance (JSON) and save\n\
		      the parameters, specs and vocabulary."
    )]
    Train(TrainArgs),

    #[command(
        about = "Search hyperparameters within an epoch budget",
        long_about = "Sample configurations from a search space, train each\n\
		      for the given budget in parallel, and score them by\n\
		      1 - NPMI coherence of the top terms per topic.\n\
		      Optionally retrain and save the best one."
    )]
    Select(SelectArgs),

    #[command(about = "Export topic-term and document-topic probabilities")]
    Export(ExportArgs),

    #[command(about = "Print the top terms of each topic")]
    Topics(TopicsArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Train(args) => {
            train_configuration(args, cli.verbose)?;
        }
        Commands::Select(args) => {
            select_model(args)?;
        }
        Commands::Export(args) => {
            export_inference(args)?;
        }
        Commands::Topics(args) => {
            print_topics(args)?;
        }
    }

    info!("Done");
    Ok(())
}
