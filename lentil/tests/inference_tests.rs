mod common;

use candle_util::candle_core::{Device, Tensor};
use common::*;
use lentil::inference::*;
use lentil::model_io::*;
use lentil::trainer::Trainer;
use matrix_util::common_io::open_buf_reader;
use matrix_util::sparse_bow::BowMatrix;

#[test]
fn saved_model_encodes_like_the_trained_one() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(60, 0)?;
    let cfg = config("logistic_gaussian", 0.01);
    let trained = Trainer::new(&corpus, &small_options()).train_model(&cfg, 2)?;

    let dir = tempfile::tempdir()?;
    let model_dir = dir.path().to_str().unwrap();
    write_model(model_dir, &cfg, &trained, &corpus.vocab)?;

    let specs = lentil::config::read_configuration(&format!("{}/{}", model_dir, SPECS_FILE))?;
    assert_eq!(specs[TRAINING_EPOCHS_KEY].as_usize(), Some(2));
    assert_eq!(specs["embedding_size"].as_usize(), Some(20));

    // 7 documents in batches of 3: two full batches and one short
    let docs = synthetic_docs(7, 99);
    let bow = BowMatrix::from_token_ids(&docs, N_TERMS)?;
    let inference = TopicInference::read(model_dir, Device::Cpu)?.with_batch_size(3);
    assert_eq!(inference.n_topics(), N_CLUSTERS);

    let theta = inference.encode_bow(&bow, true)?;
    assert_eq!(theta.len(), 7);
    for row in theta.iter() {
        assert_eq!(row.len(), N_CLUSTERS);
        approx::assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }

    let x = Tensor::from_vec(bow.rows_dense(&(0..7).collect::<Vec<_>>()), (7, N_TERMS), &Device::Cpu)?;
    let expected = trained.model.encode(&x, true)?.to_vec2::<f32>()?;
    for (a, b) in theta.iter().flatten().zip(expected.iter().flatten()) {
        approx::assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }

    let texts: Vec<Vec<String>> = docs
        .iter()
        .map(|d| {
            let mut toks: Vec<String> = d.iter().map(|j| format!("w{}", j)).collect();
            toks.push("unknown".into());
            toks
        })
        .collect();
    let from_text = inference.encode_texts(&texts, true)?;
    assert_eq!(from_text, theta);

    let top = inference.top_k_terms(5)?;
    assert_eq!(top.len(), N_CLUSTERS);
    assert!(top.iter().all(|t| t.len() == 5));
    Ok(())
}

#[test]
fn export_bundle() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(30, 0)?;
    let cfg = config("gaussian", 0.01);
    let trained = Trainer::new(&corpus, &small_options()).train_model(&cfg, 1)?;

    let dir = tempfile::tempdir()?;
    let model_dir = dir.path().join("model");
    let model_dir = model_dir.to_str().unwrap();
    write_model(model_dir, &cfg, &trained, &corpus.vocab)?;

    let vec_file = dir.path().join("docs.vec.gz");
    let vec_file = vec_file.to_str().unwrap();
    let bow = BowMatrix::from_token_ids(&synthetic_docs(5, 1), N_TERMS)?;
    bow.write_sparse_vec_file(vec_file)?;

    let out_file = dir.path().join("details.json");
    let out_file = out_file.to_str().unwrap();
    let inference = TopicInference::read(model_dir, Device::Cpu)?;
    inference.export_inference_details(vec_file, out_file)?;

    let details: InferenceDetails = serde_json::from_reader(open_buf_reader(out_file)?)?;
    assert_eq!(details.term_topic.len(), N_CLUSTERS);
    assert_eq!(details.term_topic[0].len(), N_TERMS);
    for row in details.term_topic.iter() {
        approx::assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-4);
    }
    assert_eq!(details.topic_doc.len(), 5);
    assert_eq!(details.doc_lengths, vec![30.0; 5]);
    approx::assert_abs_diff_eq!(details.term_freqs.iter().sum::<f32>(), 150.0);

    if cfg!(target_os = "linux") {
        assert!(inference.export_inference_details(vec_file, "/dev/full").is_err());
    }
    Ok(())
}
