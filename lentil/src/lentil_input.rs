use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_model_topic::SeedTopics;
use anyhow::Context;
use log::{info, warn};
use matrix_util::common_io::*;
use matrix_util::sparse_bow::BowMatrix;
use matrix_util::vocab::Vocabulary;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use std::collections::{BTreeMap, HashMap};

/// documents used to estimate word frequencies for the decoder bias
pub const MAX_FREQ_DOCS: usize = 10_000;

pub struct CorpusArgs<'a> {
    pub train_file: &'a str,
    pub test_file: Option<&'a str>,
    pub vocab_file: &'a str,
    pub embedding_file: Option<&'a str>,
    pub seed_topic_file: Option<&'a str>,
    pub use_labels_as_covars: bool,
    pub seed: u64,
}

///
/// Read-only corpus statistics shared by all trials
///
pub struct CorpusData {
    pub vocab: Vocabulary,
    pub train: BowMatrix,
    pub test: Option<BowMatrix>,
    pub total_train_words: f64,
    pub total_test_words: f64,
    pub word_freqs: Vec<f32>,
    pub embedding: Option<Tensor>,
    pub seeds: Option<SeedTopics>,
    pub n_covars: usize,
}

impl CorpusData {
    pub fn read(args: &CorpusArgs) -> anyhow::Result<Self> {
        let vocab = Vocabulary::read_vocab_file(args.vocab_file)
            .with_context(|| format!("failed to read vocabulary {}", args.vocab_file))?;
        info!("vocabulary: {} terms", vocab.len());

        let train = BowMatrix::read_sparse_vec_file(args.train_file, vocab.len())
            .with_context(|| format!("failed to read training documents {}", args.train_file))?;
        info!("training documents: {}", train.num_docs());

        let test = match args.test_file {
            Some(file) => {
                let test = BowMatrix::read_sparse_vec_file(file, vocab.len())
                    .with_context(|| format!("failed to read test documents {}", file))?;
                info!("test documents: {}", test.num_docs());
                Some(test)
            }
            None => None,
        };

        let mut corpus = Self::from_parts(vocab, train, test, args.use_labels_as_covars)?;

        if let Some(file) = args.embedding_file {
            let emb = read_word_vectors(file, &corpus.vocab, args.seed)?;
            corpus = corpus.with_embedding(emb)?;
        }

        if let Some(file) = args.seed_topic_file {
            let seeds = read_seed_topics(file, &corpus.vocab)?;
            corpus = corpus.with_seeds(seeds);
        }

        Ok(corpus)
    }

    ///
    /// * `vocab` - vocabulary aligned with the matrix columns
    /// * `train` - training documents
    /// * `test` - optional held-out documents
    /// * `use_labels_as_covars` - one-hot labels enter the decoder
    ///
    pub fn from_parts(
        vocab: Vocabulary,
        train: BowMatrix,
        test: Option<BowMatrix>,
        use_labels_as_covars: bool,
    ) -> anyhow::Result<Self> {
        if vocab.is_empty() {
            anyhow::bail!("empty vocabulary");
        }
        if train.num_docs() == 0 {
            anyhow::bail!("no training documents");
        }
        if train.num_terms() != vocab.len() {
            anyhow::bail!(
                "training matrix has {} columns but {} terms in the vocabulary",
                train.num_terms(),
                vocab.len()
            );
        }
        if let Some(test) = test.as_ref() {
            if test.num_terms() != vocab.len() {
                anyhow::bail!("test matrix has {} columns", test.num_terms());
            }
            if test.num_docs() == 0 {
                anyhow::bail!("held-out file has no documents");
            }
        }

        let n_covars = if use_labels_as_covars {
            let labels = train.labels().ok_or(anyhow::anyhow!(
                "labels as covariates requested but training documents carry no labels"
            ))?;
            let test_labels = test.as_ref().and_then(|t| t.labels()).unwrap_or(&[]);
            let max_label = labels
                .iter()
                .chain(test_labels.iter())
                .copied()
                .max()
                .unwrap_or(0);
            if labels.iter().any(|&l| l < 0) {
                anyhow::bail!("negative document label");
            }
            (max_label + 1) as usize
        } else {
            0
        };

        Ok(Self {
            total_train_words: train.total_words(),
            total_test_words: test.as_ref().map(|t| t.total_words()).unwrap_or(0.0),
            word_freqs: train.term_counts_first(MAX_FREQ_DOCS),
            vocab,
            train,
            test,
            embedding: None,
            seeds: None,
            n_covars,
        })
    }

    /// attach pretrained word vectors (terms x dims)
    pub fn with_embedding(mut self, emb: Tensor) -> anyhow::Result<Self> {
        let (v, _) = emb.dims2()?;
        if v != self.vocab.len() {
            anyhow::bail!("{} word vectors for {} terms", v, self.vocab.len());
        }
        self.embedding = Some(emb);
        Ok(self)
    }

    pub fn with_seeds(mut self, seeds: SeedTopics) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn embedding_size(&self) -> Option<usize> {
        self.embedding.as_ref().and_then(|e| e.dims2().ok()).map(|(_, e)| e)
    }

    /// held-out documents if present, otherwise the training set
    pub fn eval_bow(&self) -> &BowMatrix {
        self.test.as_ref().unwrap_or(&self.train)
    }

    pub fn has_test(&self) -> bool {
        self.test.is_some()
    }
}

///
/// Read `token v1 v2 ... vE` lines into a (terms x E) matrix aligned
/// with `vocab`. Terms without a vector get N(0, 1) entries drawn
/// from `seed`. A leading `count dim` header line is skipped.
///
pub fn read_word_vectors(file: &str, vocab: &Vocabulary, seed: u64) -> anyhow::Result<Tensor> {
    let lines = read_lines_of_words(file)?;

    let dim = lines
        .iter()
        .map(|w| w.len())
        .find(|&n| n > 2)
        .map(|n| n - 1)
        .ok_or(anyhow::anyhow!("no word vectors in {}", file))?;

    let mut vectors: HashMap<usize, Vec<f32>> = HashMap::new();
    for words in lines.iter() {
        if words.len() != dim + 1 {
            continue;
        }
        let Some(idx) = vocab.index(&words[0]) else {
            continue;
        };
        let v = words[1..]
            .iter()
            .map(|x| x.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("bad vector for {}: {}", words[0], e))?;
        vectors.insert(idx, v);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut num_oov = 0;
    let mut data = Vec::with_capacity(vocab.len() * dim);
    for idx in 0..vocab.len() {
        match vectors.get(&idx) {
            Some(v) => data.extend_from_slice(v),
            None => {
                num_oov += 1;
                data.extend((0..dim).map(|_| {
                    let z: f32 = StandardNormal.sample(&mut rng);
                    z
                }));
            }
        }
    }

    if num_oov > 0 {
        info!("{} terms did not appear in {}", num_oov, file);
    }

    Ok(Tensor::from_vec(data, (vocab.len(), dim), &Device::Cpu)?)
}

///
/// Read `{"topic": ["term", ...], ...}`; unknown terms are dropped
///
pub fn read_seed_topics(file: &str, vocab: &Vocabulary) -> anyhow::Result<SeedTopics> {
    let reader = open_buf_reader(file)?;
    let raw: BTreeMap<String, Vec<String>> = serde_json::from_reader(reader)
        .map_err(|e| anyhow::anyhow!("failed to parse seed topics {}: {}", file, e))?;

    let mut groups = vec![];
    for (topic, terms) in raw {
        let topic: usize = topic
            .parse()
            .map_err(|_| anyhow::anyhow!("seed topic key `{}` is not an index", topic))?;
        let ids = vocab.to_indices(&terms);
        if ids.len() < terms.len() {
            warn!(
                "topic {}: {} seed terms not in the vocabulary",
                topic,
                terms.len() - ids.len()
            );
        }
        groups.push((topic, ids));
    }
    Ok(SeedTopics { groups })
}
