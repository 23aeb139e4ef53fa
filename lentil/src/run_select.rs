use crate::cli_common::*;
use clap::Args;
use lentil::config_space::SearchSpace;
use lentil::search::*;
use log::info;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct SelectArgs {
    #[command(flatten)]
    corpus: CorpusInputArgs,

    #[command(flatten)]
    training: TrainingArgs,

    #[arg(
        long,
        required = true,
        help = "Search space (JSON)",
        long_help = "Hyperparameter domains to sample from, e.g.,\n\
		     {\"hyperparameters\": [\n\
		       {\"name\": \"lr\", \"type\": \"float\", \"lower\": 1e-4, \"upper\": 1e-2, \"log\": true},\n\
		       {\"name\": \"latent_distribution\", \"type\": \"categorical\", \"values\": [\"vmf\", \"gaussian\"]},\n\
		       {\"name\": \"kappa\", \"type\": \"float\", \"lower\": 10, \"upper\": 200,\n\
		        \"condition\": {\"parent\": \"latent_distribution\", \"values\": [\"vmf\"]}}]}"
    )]
    config_space: Box<str>,

    #[arg(
        long,
        required = true,
        help = "Epochs per trial",
        long_help = "Maximum number of training epochs of each trial."
    )]
    budget: usize,

    #[arg(
        long,
        default_value_t = 4,
        help = "Search rounds",
        long_help = "Number of rounds of configurations to evaluate."
    )]
    iterations: usize,

    #[arg(
        long,
        default_value_t = 8,
        help = "Configurations per round",
        long_help = "Number of configurations sampled and trained in each round."
    )]
    configs_per_round: usize,

    #[arg(
        long,
        help = "Number of parallel trials",
        long_help = "Number of trials trained at the same time.\n\
		     Defaults to the number of CPUs."
    )]
    workers: Option<usize>,

    #[arg(
        long,
        default_value = "_experiments",
        help = "Output directory for search results",
        long_help = "Directory for {save_dir}/results.json,\n\
		     one JSON record per finished trial."
    )]
    save_dir: Box<str>,

    #[arg(
        long,
        help = "Model directory for the best configuration",
        long_help = "Retrain the best configuration and write it to this directory."
    )]
    model_dir: Option<Box<str>>,
}

pub fn select_model(args: &SelectArgs) -> anyhow::Result<()> {
    let corpus = args.corpus.read_corpus(args.training.seed())?;
    let opts = args
        .training
        .run_options(args.corpus.use_labels_as_covars(), false);

    let mut space = SearchSpace::read_json(&args.config_space)?;
    if corpus.embedding.is_some() && space.contains("embedding_size") {
        info!("pretrained word vectors fix the embedding size");
        space = space.without("embedding_size");
    }

    let mut optimizer = RandomSearch::new(
        space,
        args.budget,
        args.iterations,
        args.configs_per_round,
        args.training.seed(),
    )?;

    let num_workers = args.workers.unwrap_or_else(num_cpus::get);
    let orchestrator =
        SearchOrchestrator::new(Arc::new(corpus), opts, num_workers).with_save_dir(&args.save_dir);

    let res = orchestrator.run(&mut optimizer)?;

    if let Some(model_dir) = args.model_dir.as_deref() {
        if let Some(result) = orchestrator.retrain_incumbent(&res, model_dir)? {
            info!("retrained best configuration: loss = {:.4}", result.loss);
        }
    }
    Ok(())
}
