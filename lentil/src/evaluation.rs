use candle_util::candle_core::Device;
use candle_util::candle_data_loader::*;
use candle_util::candle_model_topic::{Penalty, TopicModel};
use log::info;
use matrix_util::coherence::NpmiEvaluator;
use matrix_util::sparse_bow::BowMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// loss reported for a diverged trial (worse than any 1 - npmi)
pub const SENTINEL_LOSS: f64 = 2.0;

///
/// A non-finite loss or statistic; aborts the current trial only
///
#[derive(Debug, Clone)]
pub struct NumericalError {
    pub what: Box<str>,
    pub epoch: usize,
}

impl fmt::Display for NumericalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at epoch {}", self.what, self.epoch)
    }
}

impl std::error::Error for NumericalError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Ok,
    Diverged,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialInfo {
    pub test_perplexity: f64,
    pub train_loss: f64,
    pub coherence: f64,
    pub status: TrialStatus,
}

/// Objective handed back to the search: `loss = 1 - coherence`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub loss: f64,
    pub info: TrialInfo,
}

impl TrialResult {
    pub fn from_scores(coherence: f64, test_perplexity: f64, train_loss: f64) -> Self {
        Self {
            loss: 1.0 - coherence,
            info: TrialInfo {
                test_perplexity,
                train_loss,
                coherence,
                status: TrialStatus::Ok,
            },
        }
    }

    pub fn diverged() -> Self {
        Self {
            loss: SENTINEL_LOSS,
            info: TrialInfo {
                test_perplexity: f64::INFINITY,
                train_loss: f64::INFINITY,
                coherence: -1.0,
                status: TrialStatus::Diverged,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.info.status == TrialStatus::Ok
    }
}

///
/// exp(Σ reconstruction / Σ words) over held-out documents with
/// the model in evaluation mode. 1.0 when there are no words.
///
/// * `model` - trained topic model
/// * `bow` - held-out documents
/// * `n_covars` - label covariates (0 for none)
/// * `batch_size` - documents per forward pass
///
pub fn perplexity(
    model: &TopicModel,
    bow: &BowMatrix,
    n_covars: usize,
    batch_size: usize,
) -> anyhow::Result<f64> {
    let total_words = bow.total_words();
    if total_words <= 0.0 || bow.num_docs() == 0 {
        return Ok(1.0);
    }

    let dev = model.device().clone();
    let mut data = BowData::new(bow, n_covars)?;
    data.ordered_minibatch(batch_size)?;

    let no_penalty = Penalty::default();
    let mut total_rec = 0_f64;
    for b in 0..data.num_minibatch() {
        let mb = data.minibatch_data(b, &dev)?;
        let parts = model.forward_t(&mb.input, mb.covariates.as_ref(), &no_penalty, false)?;
        total_rec += parts
            .reconstruction
            .sum_all()?
            .to_device(&Device::Cpu)?
            .to_scalar::<f32>()? as f64;
    }

    let ppl = (total_rec / total_words).exp();
    info!("perplexity = {:.2}", ppl);
    Ok(ppl)
}

///
/// Average NPMI of each topic's `top_k` decoder terms, counted on
/// the documents `npmi` was built from
///
pub fn coherence(model: &TopicModel, npmi: &NpmiEvaluator, top_k: usize) -> anyhow::Result<f64> {
    let topics = model.top_terms(top_k)?;
    let score = npmi.evaluate(&topics);
    info!("coherence (npmi) = {:.4}", score);
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_result_loss() {
        let res = TrialResult::from_scores(0.25, 100.0, 5.0);
        approx::assert_relative_eq!(res.loss, 0.75);
        assert!(res.is_ok());

        let bad = TrialResult::diverged();
        assert!(bad.loss > res.loss);
        assert!(!bad.is_ok());

        let json = serde_json::to_string(&bad).unwrap();
        assert!(json.contains("\"diverged\""));
    }
}
