use clap::Args;
use lentil::config::*;
use lentil::lentil_input::*;

#[derive(Args, Debug)]
pub struct CorpusInputArgs {
    #[arg(
        long = "train-vec",
        required = true,
        help = "Training documents (sparse vector format)",
        long_help = "Training documents, one per line: `[label] idx:count idx:count ...`.\n\
		     Term indexes are 0-based positions in the vocabulary file.\n\
		     Gzipped files (.gz) are read transparently."
    )]
    tr_vec_file: Box<str>,

    #[arg(
        long = "test-vec",
        help = "Held-out documents (sparse vector format)",
        long_help = "Held-out documents used for perplexity and coherence.\n\
		     Without them, scores are computed on the training documents."
    )]
    tst_vec_file: Option<Box<str>>,

    #[arg(
        long = "vocab",
        required = true,
        help = "Vocabulary file",
        long_help = "Vocabulary file with one `token [count]` per line,\n\
		     in the order of the term indexes."
    )]
    vocab_file: Box<str>,

    #[arg(
        long = "embedding",
        help = "Pretrained word vectors",
        long_help = "Pretrained word vectors, one `token v1 v2 ... vE` per line.\n\
		     Sets the embedding size; terms without a vector\n\
		     are initialized with N(0, 1) entries."
    )]
    embedding_file: Option<Box<str>>,

    #[arg(
        long = "topic-seeds",
        help = "Seed topic file (JSON)",
        long_help = "Seed terms per topic as JSON: {\"0\": [\"term\", ...], ...}.\n\
		     Seed terms are boosted in their topic at initialization\n\
		     and kept there by an entropy penalty."
    )]
    topic_seed_file: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = false,
        help = "Use document labels as covariates",
        long_help = "Feed one-hot document labels into the decoder\n\
		     next to the topic proportions."
    )]
    use_labels_as_covars: bool,
}

impl CorpusInputArgs {
    pub fn read_corpus(&self, seed: u64) -> anyhow::Result<CorpusData> {
        CorpusData::read(&CorpusArgs {
            train_file: &self.tr_vec_file,
            test_file: self.tst_vec_file.as_deref(),
            vocab_file: &self.vocab_file,
            embedding_file: self.embedding_file.as_deref(),
            seed_topic_file: self.topic_seed_file.as_deref(),
            use_labels_as_covars: self.use_labels_as_covars,
            seed,
        })
    }

    pub fn use_labels_as_covars(&self) -> bool {
        self.use_labels_as_covars
    }
}

#[derive(Args, Debug)]
pub struct TrainingArgs {
    #[arg(
        long,
        default_value_t = 200,
        help = "Minibatch size",
        long_help = "Number of documents per training batch.\n\
		     The last batch of an epoch may be smaller."
    )]
    batch_size: usize,

    #[arg(
        long,
        default_value_t = 1234,
        help = "Random seed",
        long_help = "Seed for parameter initialization, shuffling,\n\
		     sampling noise and dropout."
    )]
    seed: u64,

    #[arg(
        long,
        default_value_t = 1,
        help = "Evaluation frequency (epochs)",
        long_help = "Compute held-out perplexity every this many epochs."
    )]
    eval_freq: usize,

    #[arg(
        long,
        help = "Trace file",
        long_help = "Write `Epoch,PPL,NPMI` lines at every evaluation.\n\
		     During model search, each trial writes to {trace}.{id}."
    )]
    trace_file: Option<Box<str>>,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Initial sparsity penalty",
        long_help = "Starting L1 coefficient on the topic-term weights.\n\
		     Only used when the configuration sets `target_sparsity`."
    )]
    init_sparsity_pen: f64,

    #[arg(
        long,
        default_value_t = 0.001,
        help = "Sparsity threshold",
        long_help = "Weights with magnitude below this count as zero\n\
		     when measuring the sparsity ratio."
    )]
    sparsity_threshold: f64,

    #[arg(
        long,
        default_value_t = false,
        help = "Freeze the embedding layer",
        long_help = "Keep pretrained word vectors fixed during training."
    )]
    fixed_embedding: bool,

    #[arg(
        long,
        default_value_t = 10,
        help = "Top terms for coherence",
        long_help = "Number of top terms per topic used for NPMI coherence."
    )]
    top_k: usize,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "A device for cuda",
        long_help = "For cuda or metal, we may want to choose a different device."
    )]
    device_no: usize,
}

impl TrainingArgs {
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn run_options(&self, use_labels_as_covars: bool, show_progress: bool) -> RunOptions {
        RunOptions {
            batch_size: self.batch_size,
            seed: self.seed,
            eval_freq: self.eval_freq,
            trace_file: self.trace_file.clone(),
            init_sparsity_pen: self.init_sparsity_pen,
            sparsity_threshold: self.sparsity_threshold,
            use_labels_as_covars,
            fixed_embedding: self.fixed_embedding,
            top_k: self.top_k,
            device: self.device,
            device_no: self.device_no,
            show_progress,
        }
    }
}
