#![allow(dead_code)]

use lentil::config::*;
use lentil::lentil_input::CorpusData;
use matrix_util::sparse_bow::BowMatrix;
use matrix_util::vocab::Vocabulary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const N_TERMS: usize = 50;
pub const N_CLUSTERS: usize = 3;
pub const TERMS_PER_CLUSTER: usize = 16;

///
/// Documents drawn from one of three disjoint blocks of 16 terms,
/// with a little background noise over all 50 terms
///
pub fn synthetic_docs(ndocs: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..ndocs)
        .map(|d| {
            let block = d % N_CLUSTERS;
            let mut doc: Vec<usize> = (0..27)
                .map(|_| block * TERMS_PER_CLUSTER + rng.random_range(0..TERMS_PER_CLUSTER))
                .collect();
            doc.extend((0..3).map(|_| rng.random_range(0..N_TERMS)));
            doc
        })
        .collect()
}

pub fn synthetic_vocab() -> Vocabulary {
    let tokens: Vec<String> = (0..N_TERMS).map(|j| format!("w{}", j)).collect();
    Vocabulary::from_tokens(&tokens).unwrap()
}

pub fn synthetic_corpus(ntrain: usize, ntest: usize) -> anyhow::Result<CorpusData> {
    let train = BowMatrix::from_token_ids(&synthetic_docs(ntrain, 11), N_TERMS)?;
    let test = if ntest > 0 {
        Some(BowMatrix::from_token_ids(&synthetic_docs(ntest, 12), N_TERMS)?)
    } else {
        None
    };
    CorpusData::from_parts(synthetic_vocab(), train, test, false)
}

pub fn config(latent: &str, lr: f64) -> Configuration {
    let mut cfg = Configuration::new();
    cfg.insert("lr".into(), HpValue::Float(lr));
    cfg.insert("latent_distribution".into(), HpValue::Str(latent.into()));
    cfg.insert("optimizer".into(), HpValue::Str("adam".into()));
    cfg.insert("n_latent".into(), HpValue::Int(N_CLUSTERS as i64));
    cfg.insert("enc_hidden_dim".into(), HpValue::Int(32));
    cfg.insert("embedding_size".into(), HpValue::Int(20));
    cfg
}

pub fn small_options() -> RunOptions {
    RunOptions {
        batch_size: 16,
        seed: 42,
        ..RunOptions::default()
    }
}
