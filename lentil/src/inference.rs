use crate::model_io::*;

use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_nn::ops;
use log::info;
use matrix_util::common_io::with_buf_writer;
use matrix_util::sparse_bow::BowMatrix;
use matrix_util::vocab::Vocabulary;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INFERENCE_BATCH: usize = 200;

/// Everything needed to visualize a model over a document collection
#[derive(Debug, Serialize, Deserialize)]
pub struct InferenceDetails {
    /// P(term | topic), topics x terms
    pub term_topic: Vec<Vec<f32>>,
    /// topic proportions, documents x topics
    pub topic_doc: Vec<Vec<f32>>,
    pub doc_lengths: Vec<f32>,
    pub term_freqs: Vec<f32>,
}

///
/// Encode new documents with a saved model
///
pub struct TopicInference {
    saved: SavedModel,
    device: Device,
    batch_size: usize,
}

impl TopicInference {
    pub fn read(model_dir: &str, device: Device) -> anyhow::Result<Self> {
        let saved = read_model(model_dir, &device)?;
        Ok(Self::from_saved(saved, device))
    }

    pub fn from_saved(saved: SavedModel, device: Device) -> Self {
        Self {
            saved,
            device,
            batch_size: DEFAULT_INFERENCE_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.saved.vocab
    }

    pub fn n_topics(&self) -> usize {
        self.saved.model.config().n_topics
    }

    ///
    /// Encode every document in order: full batches first, then the
    /// remaining short batch on its own
    ///
    /// * `bow` - documents over this model's vocabulary
    /// * `use_probs` - topic proportions instead of raw encodings
    ///
    pub fn encode_bow(&self, bow: &BowMatrix, use_probs: bool) -> anyhow::Result<Vec<Vec<f32>>> {
        if bow.num_terms() != self.vocab().len() {
            anyhow::bail!(
                "documents have {} terms, the model has {}",
                bow.num_terms(),
                self.vocab().len()
            );
        }

        let ndocs = bow.num_docs();
        if ndocs == 0 {
            return Ok(vec![]);
        }
        let batch_size = self.batch_size.min(ndocs);
        let nfull = ndocs / batch_size;
        let last_batch_size = ndocs % batch_size;

        let mut encodings = Vec::with_capacity(ndocs);
        for b in 0..nfull {
            let rows: Vec<usize> = (b * batch_size..(b + 1) * batch_size).collect();
            encodings.extend(self.encode_rows(bow, &rows, use_probs)?);
        }
        if last_batch_size > 0 {
            let rows: Vec<usize> = (ndocs - last_batch_size..ndocs).collect();
            encodings.extend(self.encode_rows(bow, &rows, use_probs)?);
        }
        Ok(encodings)
    }

    fn encode_rows(
        &self,
        bow: &BowMatrix,
        rows: &[usize],
        use_probs: bool,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let x_nd = Tensor::from_vec(
            bow.rows_dense(rows),
            (rows.len(), bow.num_terms()),
            &self.device,
        )?;
        let enc_nk = self.saved.model.encode(&x_nd, use_probs)?;
        Ok(enc_nk.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }

    /// encode a sparse-vector file; labels come back when present
    pub fn encode_vec_file(
        &self,
        vec_file: &str,
        use_probs: bool,
    ) -> anyhow::Result<(Vec<Vec<f32>>, Option<Vec<i64>>)> {
        let bow = BowMatrix::read_sparse_vec_file(vec_file, self.vocab().len())?;
        let encodings = self.encode_bow(&bow, use_probs)?;
        Ok((encodings, bow.labels().map(|l| l.to_vec())))
    }

    /// encode tokenized documents; unknown tokens are ignored
    pub fn encode_texts<T: AsRef<str>>(
        &self,
        docs: &[Vec<T>],
        use_probs: bool,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let ids: Vec<Vec<usize>> = docs.iter().map(|d| self.vocab().to_indices(d)).collect();
        let bow = BowMatrix::from_token_ids(&ids, self.vocab().len())?;
        self.encode_bow(&bow, use_probs)
    }

    /// `k` highest-weight terms of each topic
    pub fn top_k_terms(&self, k: usize) -> anyhow::Result<Vec<Vec<Box<str>>>> {
        let vocab = self.vocab();
        self.saved
            .model
            .top_terms(k)?
            .into_iter()
            .map(|ids| {
                ids.into_iter()
                    .map(|i| {
                        vocab
                            .token(i)
                            .map(|t| t.into())
                            .ok_or(anyhow::anyhow!("term {} outside the vocabulary", i))
                    })
                    .collect()
            })
            .collect()
    }

    /// P(term | topic) as softmax over each topic's decoder weights
    pub fn term_topic_probs(&self) -> anyhow::Result<Vec<Vec<f32>>> {
        let w_kd = self.saved.model.topic_term_weights()?.t()?.contiguous()?;
        Ok(ops::softmax(&w_kd, 1)?
            .to_device(&Device::Cpu)?
            .to_vec2::<f32>()?)
    }

    pub fn inference_details(&self, bow: &BowMatrix) -> anyhow::Result<InferenceDetails> {
        Ok(InferenceDetails {
            term_topic: self.term_topic_probs()?,
            topic_doc: self.encode_bow(bow, true)?,
            doc_lengths: bow.doc_lengths(),
            term_freqs: bow.term_counts(),
        })
    }

    ///
    /// Write the JSON bundle `{term_topic, topic_doc, doc_lengths,
    /// term_freqs}` for the documents in `vec_file`
    ///
    pub fn export_inference_details(&self, vec_file: &str, out_file: &str) -> anyhow::Result<()> {
        let bow = BowMatrix::read_sparse_vec_file(vec_file, self.vocab().len())?;
        let details = self.inference_details(&bow)?;
        with_buf_writer(out_file, |writer| Ok(serde_json::to_writer_pretty(writer, &details)?))?;
        info!(
            "wrote {} documents x {} topics to {}",
            details.topic_doc.len(),
            self.n_topics(),
            out_file
        );
        Ok(())
    }
}
