use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use candle_util::candle_latent_distribution::LatentKind;
use candle_util::candle_model_topic::*;
use candle_util::candle_noise::NoiseSource;
use std::sync::Arc;

const N_FEATURES: usize = 30;
const N_TOPICS: usize = 4;

fn config(n_covars: usize, fixed_embedding: bool) -> TopicModelConfig {
    TopicModelConfig {
        n_features: N_FEATURES,
        n_topics: N_TOPICS,
        embedding_size: 8,
        hidden_dims: vec![16],
        n_covars,
        latent: LatentKind::gaussian(),
        coherence_penalty: 0.5,
        fixed_embedding,
    }
}

fn counts(dev: &Device) -> Result<Tensor> {
    let mut x = vec![0_f32; 4 * N_FEATURES];
    for i in 1..4 {
        for j in 0..N_FEATURES {
            x[i * N_FEATURES + j] = ((i * 7 + j * 3) % 4) as f32;
        }
    }
    Ok(Tensor::from_vec(x, (4, N_FEATURES), dev)?)
}

fn word_freqs() -> Vec<f32> {
    (0..N_FEATURES).map(|j| (j % 5) as f32).collect()
}

struct Fixture {
    varmap: VarMap,
    model: TopicModel,
}

fn build(cfg: TopicModelConfig, seeds: Option<&SeedTopics>) -> Result<Fixture> {
    let dev = Device::Cpu;
    let noise = Arc::new(NoiseSource::seed_from_u64(5));
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let mut model = TopicModel::new(cfg, seeds, None, noise.clone(), vb)?;
    model.initialize(&varmap, &noise, &word_freqs())?;
    model.post_init()?;
    Ok(Fixture { varmap, model })
}

#[test]
fn elbo_parts_add_up() -> Result<()> {
    let seeds = SeedTopics {
        groups: vec![(0, vec![1, 2]), (2, vec![5])],
    };
    let fx = build(config(0, false), Some(&seeds))?;
    let x = counts(&Device::Cpu)?;

    let penalty = Penalty { l1_coef: 0.01 };
    let parts = fx.model.forward_t(&x, None, &penalty, true)?;

    let rec = parts.reconstruction.to_vec1::<f32>()?;
    let kl = parts.kl.to_vec1::<f32>()?;
    let l1 = parts.l1.to_vec1::<f32>()?;
    let ent = parts.entropy.as_ref().unwrap().to_vec1::<f32>()?;
    let coh = parts.coherence.as_ref().unwrap().to_vec1::<f32>()?;
    let elbo = parts.elbo.to_vec1::<f32>()?;

    assert_eq!(elbo.len(), 4);
    assert_eq!(rec[0], 0.0, "empty document");
    assert!(l1.iter().all(|&v| v > 0.0));
    assert!(coh.iter().all(|&v| v >= 0.0));
    for i in 0..4 {
        approx::assert_relative_eq!(
            elbo[i],
            rec[i] + kl[i] + l1[i] + ent[i] + coh[i],
            max_relative = 1e-4
        );
    }
    Ok(())
}

#[test]
fn decoder_bias_and_seed_boost() -> Result<()> {
    let seeds = SeedTopics {
        groups: vec![(0, vec![1, 2])],
    };
    let fx = build(config(0, false), Some(&seeds))?;

    let data = fx.varmap.data().lock().unwrap();
    let bias = data["decoder.dictionary.bias"].to_vec1::<f32>()?;
    let freqs = word_freqs();
    let tot: f32 = freqs.iter().map(|x| x + 1.0).sum();
    for (b, f) in bias.iter().zip(freqs.iter()) {
        approx::assert_relative_eq!(*b, ((f + 1.0) / tot).ln(), max_relative = 1e-5);
    }
    drop(data);

    let top = fx.model.top_terms(2)?;
    assert_eq!(top.len(), N_TOPICS);
    assert!(top[0].contains(&1) && top[0].contains(&2), "{:?}", top[0]);
    Ok(())
}

#[test]
fn frozen_embedding_is_not_updated() -> Result<()> {
    let fx = build(config(0, true), None)?;
    let vars = fx.model.trainable_vars(&fx.varmap)?;
    let n_all = fx.varmap.all_vars().len();
    assert_eq!(vars.len() + 2, n_all, "embedding weight and bias excluded");

    let before = fx.model.encoder().embedding_weight().to_vec2::<f32>()?;
    let mut opt = candle_nn::AdamW::new(
        vars,
        candle_nn::ParamsAdamW {
            lr: 0.01,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;
    let x = counts(&Device::Cpu)?;
    let parts = fx
        .model
        .forward_t(&x, None, &Penalty::default(), true)?;
    opt.backward_step(&parts.elbo.mean_all()?)?;

    let after = fx.model.encoder().embedding_weight().to_vec2::<f32>()?;
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn encode_on_simplex() -> Result<()> {
    let fx = build(config(0, false), None)?;
    let x = counts(&Device::Cpu)?;
    let theta = fx.model.encode(&x, true)?;
    assert_eq!(theta.dims(), &[4, N_TOPICS]);
    for s in theta.sum(1)?.to_vec1::<f32>()? {
        approx::assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
    }
    let raw = fx.model.encode(&x, false)?;
    assert_eq!(raw.dims(), &[4, N_TOPICS]);
    Ok(())
}

#[test]
fn covariates_required_when_configured() -> Result<()> {
    let fx = build(config(2, false), None)?;
    let x = counts(&Device::Cpu)?;
    let cov = Tensor::new(&[[1_f32, 0.], [0., 1.], [1., 0.], [0., 1.]], &Device::Cpu)?;

    let parts = fx.model.forward_t(&x, Some(&cov), &Penalty::default(), true)?;
    assert_eq!(parts.elbo.dims(), &[4]);
    assert!(fx.model.forward_t(&x, None, &Penalty::default(), true).is_err());
    Ok(())
}

#[test]
fn seed_outside_vocabulary_rejected() {
    let seeds = SeedTopics {
        groups: vec![(0, vec![N_FEATURES + 3])],
    };
    assert!(build(config(0, false), Some(&seeds)).is_err());
}
