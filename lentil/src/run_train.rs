use crate::cli_common::*;
use clap::Args;
use lentil::config::*;
use lentil::model_io::*;
use lentil::trainer::Trainer;
use log::info;

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    corpus: CorpusInputArgs,

    #[command(flatten)]
    training: TrainingArgs,

    #[arg(
        long = "config",
        required = true,
        help = "Configuration instance (JSON)",
        long_help = "A single configuration as a JSON object, e.g.,\n\
		     {\"lr\": 0.005, \"latent_distribution\": \"vmf\", \"optimizer\": \"adam\",\n\
		      \"n_latent\": 20, \"enc_hidden_dim\": 100, \"embedding_size\": 100,\n\
		      \"training_epochs\": 40}"
    )]
    config_instance: Box<str>,

    #[arg(
        long,
        short = 'i',
        help = "Number of training epochs",
        long_help = "Number of training epochs.\n\
		     Overrides `training_epochs` of the configuration."
    )]
    epochs: Option<usize>,

    #[arg(
        long,
        required = true,
        help = "Model directory",
        long_help = "Directory to write the model into:\n\
		     - {model_dir}/model.params\n\
		     - {model_dir}/model.specs\n\
		     - {model_dir}/vocab.json\n"
    )]
    model_dir: Box<str>,
}

pub fn train_configuration(args: &TrainArgs, verbose: bool) -> anyhow::Result<()> {
    let corpus = args.corpus.read_corpus(args.training.seed())?;
    let opts = args
        .training
        .run_options(args.corpus.use_labels_as_covars(), !verbose);

    let cfg = read_configuration(&args.config_instance)?;
    let budget = match args.epochs {
        Some(epochs) => epochs,
        None => cfg
            .get(TRAINING_EPOCHS_KEY)
            .and_then(|x| x.as_usize())
            .ok_or(anyhow::anyhow!(
                "set --epochs or `{}` in {}",
                TRAINING_EPOCHS_KEY,
                args.config_instance
            ))?,
    };

    let trained = Trainer::new(&corpus, &opts).train_model(&cfg, budget)?;
    info!(
        "loss = {:.4}, perplexity = {:.2}",
        trained.result.loss, trained.result.info.test_perplexity
    );

    write_model(&args.model_dir, &cfg, &trained, &corpus.vocab)?;
    Ok(())
}
