use anyhow::Context;
use candle_util::candle_core::Device;
use candle_util::candle_latent_distribution::LatentKind;
use candle_util::candle_vmf_sampler::MAX_KAPPA;
use clap::ValueEnum;
use matrix_util::common_io::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One hyperparameter value: integer, float or string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HpValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl HpValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HpValue::Int(x) => Some(*x as f64),
            HpValue::Float(x) => Some(*x),
            HpValue::Str(_) => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            HpValue::Int(x) if *x >= 0 => Some(*x as usize),
            HpValue::Float(x) if *x >= 0.0 && x.fract() == 0.0 => Some(*x as usize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HpValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for HpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HpValue::Int(x) => write!(f, "{}", x),
            HpValue::Float(x) => write!(f, "{}", x),
            HpValue::Str(x) => write!(f, "{}", x),
        }
    }
}

/// A sampled (or hand-written) hyperparameter assignment
pub type Configuration = BTreeMap<String, HpValue>;

pub const REQUIRED_KEYS: [&str; 6] = [
    "lr",
    "latent_distribution",
    "optimizer",
    "n_latent",
    "enc_hidden_dim",
    "embedding_size",
];

/// Read a configuration instance from a JSON object
pub fn read_configuration(json_file: &str) -> anyhow::Result<Configuration> {
    let reader = open_buf_reader(json_file)?;
    let cfg: Configuration = serde_json::from_reader(reader)
        .with_context(|| format!("failed to parse configuration {}", json_file))?;
    Ok(cfg)
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

///
/// Typed and validated view of a `Configuration`
///
#[derive(Clone, Debug, PartialEq)]
pub struct TrialConfig {
    pub lr: f64,
    pub optimizer: OptimizerKind,
    pub latent: LatentKind,
    pub n_latent: usize,
    pub enc_hidden_dim: usize,
    pub embedding_size: usize,
    pub target_sparsity: f64,
    pub coherence_reg_penalty: f64,
}

fn get<'a>(cfg: &'a Configuration, key: &str) -> anyhow::Result<&'a HpValue> {
    cfg.get(key)
        .ok_or(anyhow::anyhow!("configuration is missing `{}`", key))
}

fn get_f64(cfg: &Configuration, key: &str) -> anyhow::Result<f64> {
    get(cfg, key)?
        .as_f64()
        .ok_or(anyhow::anyhow!("`{}` must be a number", key))
}

fn get_usize(cfg: &Configuration, key: &str) -> anyhow::Result<usize> {
    let x = get(cfg, key)?
        .as_usize()
        .ok_or(anyhow::anyhow!("`{}` must be a non-negative integer", key))?;
    if x == 0 {
        anyhow::bail!("`{}` must be positive", key);
    }
    Ok(x)
}

fn get_str<'a>(cfg: &'a Configuration, key: &str) -> anyhow::Result<&'a str> {
    get(cfg, key)?
        .as_str()
        .ok_or(anyhow::anyhow!("`{}` must be a string", key))
}

fn get_f64_or(cfg: &Configuration, key: &str, default: f64) -> anyhow::Result<f64> {
    match cfg.get(key) {
        Some(_) => get_f64(cfg, key),
        None => Ok(default),
    }
}

impl TrialConfig {
    ///
    /// Check and convert a configuration. `embedding_size` comes from
    /// the pretrained vectors when they exist.
    ///
    /// * `cfg` - sampled configuration
    /// * `pretrained_embedding_size` - dimension of pretrained vectors
    ///
    pub fn from_configuration(
        cfg: &Configuration,
        pretrained_embedding_size: Option<usize>,
    ) -> anyhow::Result<Self> {
        for key in REQUIRED_KEYS {
            if key == "embedding_size" && pretrained_embedding_size.is_some() {
                continue;
            }
            get(cfg, key)?;
        }

        let lr = get_f64(cfg, "lr")?;
        if !(lr > 0.0 && lr.is_finite()) {
            anyhow::bail!("learning rate must be positive, got {}", lr);
        }

        let optimizer = match get_str(cfg, "optimizer")? {
            "adam" => OptimizerKind::Adam,
            "sgd" => OptimizerKind::Sgd,
            other => anyhow::bail!("unknown optimizer `{}`", other),
        };

        let n_latent = get_usize(cfg, "n_latent")?;
        let enc_hidden_dim = get_usize(cfg, "enc_hidden_dim")?;
        let embedding_size = match pretrained_embedding_size {
            Some(e) => e,
            None => get_usize(cfg, "embedding_size")?,
        };

        let latent = match get_str(cfg, "latent_distribution")? {
            "gaussian" => LatentKind::gaussian(),
            "gaussian_unitvar" => LatentKind::gaussian_unit_var(),
            "logistic_gaussian" => {
                let alpha = get_f64_or(cfg, "alpha", 1.0)?;
                if !(alpha > 0.0) {
                    anyhow::bail!("`alpha` must be positive, got {}", alpha);
                }
                LatentKind::logistic_gaussian(alpha)
            }
            "vmf" => {
                let kappa = get_f64_or(cfg, "kappa", 100.0)?;
                if !(kappa > 0.0 && kappa <= MAX_KAPPA) {
                    anyhow::bail!("`kappa` must be in (0, {}], got {}", MAX_KAPPA, kappa);
                }
                if n_latent < 2 {
                    anyhow::bail!("vmf needs `n_latent` >= 2");
                }
                LatentKind::vmf(kappa)
            }
            other => anyhow::bail!("unknown latent distribution `{}`", other),
        };

        let latent = match cfg.get("latent_dropout") {
            Some(_) => {
                let rate = get_f64(cfg, "latent_dropout")?;
                if !(0.0..1.0).contains(&rate) {
                    anyhow::bail!("`latent_dropout` must be in [0, 1), got {}", rate);
                }
                latent.with_dropout(rate)
            }
            None => latent,
        };

        let target_sparsity = get_f64_or(cfg, "target_sparsity", 0.0)?;
        if !(0.0..=1.0).contains(&target_sparsity) {
            anyhow::bail!("`target_sparsity` must be in [0, 1], got {}", target_sparsity);
        }

        let coherence_reg_penalty = get_f64_or(cfg, "coherence_regularizer_penalty", 0.0)?;
        if coherence_reg_penalty < 0.0 {
            anyhow::bail!("`coherence_regularizer_penalty` must be non-negative");
        }

        Ok(Self {
            lr,
            optimizer,
            latent,
            n_latent,
            enc_hidden_dim,
            embedding_size,
            target_sparsity,
            coherence_reg_penalty,
        })
    }
}

///
/// Run-wide settings that are not searched
///
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub batch_size: usize,
    pub seed: u64,
    pub eval_freq: usize,
    pub trace_file: Option<Box<str>>,
    pub init_sparsity_pen: f64,
    pub sparsity_threshold: f64,
    pub use_labels_as_covars: bool,
    pub fixed_embedding: bool,
    pub top_k: usize,
    pub device: ComputeDevice,
    pub device_no: usize,
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            seed: 1234,
            eval_freq: 1,
            trace_file: None,
            init_sparsity_pen: 0.0,
            sparsity_threshold: 0.001,
            use_labels_as_covars: false,
            fixed_embedding: false,
            top_k: 10,
            device: ComputeDevice::Cpu,
            device_no: 0,
            show_progress: false,
        }
    }
}
