use crate::config::{Configuration, HpValue};
use matrix_util::common_io::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Domain {
    Float {
        lower: f64,
        upper: f64,
        #[serde(default)]
        log: bool,
    },
    Int {
        lower: i64,
        upper: i64,
        #[serde(default)]
        log: bool,
    },
    Categorical {
        values: Vec<HpValue>,
    },
}

/// Active only when `parent` took one of `values`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub parent: String,
    pub values: Vec<HpValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameter {
    pub name: String,
    #[serde(flatten)]
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

///
/// Hyperparameter domains to sample configurations from. A
/// conditional parameter must come after its parent.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub hyperparameters: Vec<Hyperparameter>,
}

impl SearchSpace {
    pub fn new(hyperparameters: Vec<Hyperparameter>) -> anyhow::Result<Self> {
        let space = Self { hyperparameters };
        space.validate()?;
        Ok(space)
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let space: Self = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("failed to parse search space: {}", e))?;
        space.validate()?;
        Ok(space)
    }

    pub fn read_json(json_file: &str) -> anyhow::Result<Self> {
        let reader = open_buf_reader(json_file)?;
        let space: Self = serde_json::from_reader(reader)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", json_file, e))?;
        space.validate()?;
        Ok(space)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen: Vec<&str> = vec![];
        for hp in self.hyperparameters.iter() {
            if seen.contains(&hp.name.as_str()) {
                anyhow::bail!("duplicate hyperparameter `{}`", hp.name);
            }
            match &hp.domain {
                Domain::Float { lower, upper, log } => {
                    if !(lower <= upper) || (*log && *lower <= 0.0) {
                        anyhow::bail!("invalid float range for `{}`", hp.name);
                    }
                }
                Domain::Int { lower, upper, log } => {
                    if lower > upper || (*log && *lower <= 0) {
                        anyhow::bail!("invalid int range for `{}`", hp.name);
                    }
                }
                Domain::Categorical { values } => {
                    if values.is_empty() {
                        anyhow::bail!("no choices for `{}`", hp.name);
                    }
                }
            }
            if let Some(cond) = hp.condition.as_ref() {
                if !seen.contains(&cond.parent.as_str()) {
                    anyhow::bail!(
                        "`{}` depends on `{}`, which must be defined before it",
                        hp.name,
                        cond.parent
                    );
                }
            }
            seen.push(&hp.name);
        }
        Ok(())
    }

    /// remove a parameter (and anything conditioned on it)
    pub fn without(mut self, name: &str) -> Self {
        let mut removed = vec![name.to_string()];
        self.hyperparameters.retain(|hp| {
            let drop = hp.name == name
                || hp
                    .condition
                    .as_ref()
                    .map(|c| removed.contains(&c.parent))
                    .unwrap_or(false);
            if drop {
                removed.push(hp.name.clone());
            }
            !drop
        });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hyperparameters.iter().any(|hp| hp.name == name)
    }

    ///
    /// Draw one configuration; inactive conditional parameters are
    /// left out
    ///
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Configuration {
        let mut cfg = Configuration::new();
        for hp in self.hyperparameters.iter() {
            if let Some(cond) = hp.condition.as_ref() {
                match cfg.get(&cond.parent) {
                    Some(v) if cond.values.contains(v) => {}
                    _ => continue,
                }
            }
            cfg.insert(hp.name.clone(), hp.domain.sample(rng));
        }
        cfg
    }
}

impl Domain {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> HpValue {
        match self {
            Domain::Float { lower, upper, log } => {
                if lower == upper {
                    return HpValue::Float(*lower);
                }
                let x = if *log {
                    rng.random_range(lower.ln()..upper.ln())
                        .exp()
                        .clamp(*lower, *upper)
                } else {
                    rng.random_range(*lower..*upper)
                };
                HpValue::Float(x)
            }
            Domain::Int { lower, upper, log } => {
                let x = if *log {
                    let lo = (*lower as f64 - 0.5).max(0.5).ln();
                    let hi = (*upper as f64 + 0.5).ln();
                    let x = rng.random_range(lo..hi).exp().round() as i64;
                    x.clamp(*lower, *upper)
                } else {
                    rng.random_range(*lower..=*upper)
                };
                HpValue::Int(x)
            }
            Domain::Categorical { values } => {
                values[rng.random_range(0..values.len())].clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SPACE: &str = r#"{
        "hyperparameters": [
            {"name": "lr", "type": "float", "lower": 1e-4, "upper": 1e-1, "log": true},
            {"name": "n_latent", "type": "int", "lower": 5, "upper": 20},
            {"name": "latent_distribution", "type": "categorical",
             "values": ["vmf", "gaussian"]},
            {"name": "kappa", "type": "float", "lower": 10.0, "upper": 100.0,
             "condition": {"parent": "latent_distribution", "values": ["vmf"]}},
            {"name": "embedding_size", "type": "int", "lower": 50, "upper": 300, "log": true}
        ]
    }"#;

    #[test]
    fn test_conditional_sampling() -> anyhow::Result<()> {
        let space = SearchSpace::from_json_str(SPACE)?;
        let mut rng = StdRng::seed_from_u64(3);
        let mut saw_vmf = false;
        let mut saw_gaussian = false;

        for _ in 0..200 {
            let cfg = space.sample(&mut rng);
            let lr = cfg["lr"].as_f64().unwrap();
            assert!((1e-4..=1e-1).contains(&lr));
            let k = cfg["n_latent"].as_usize().unwrap();
            assert!((5..=20).contains(&k));
            let e = cfg["embedding_size"].as_usize().unwrap();
            assert!((50..=300).contains(&e));

            match cfg["latent_distribution"].as_str().unwrap() {
                "vmf" => {
                    saw_vmf = true;
                    assert!(cfg.contains_key("kappa"));
                }
                _ => {
                    saw_gaussian = true;
                    assert!(!cfg.contains_key("kappa"));
                }
            }
        }
        assert!(saw_vmf && saw_gaussian);
        Ok(())
    }

    #[test]
    fn test_drop_and_validate() -> anyhow::Result<()> {
        let space = SearchSpace::from_json_str(SPACE)?.without("embedding_size");
        assert!(!space.contains("embedding_size"));
        assert!(space.contains("kappa"));

        let space = SearchSpace::from_json_str(SPACE)?.without("latent_distribution");
        assert!(!space.contains("kappa"));

        let bad = r#"{"hyperparameters": [
            {"name": "kappa", "type": "float", "lower": 1.0, "upper": 2.0,
             "condition": {"parent": "latent_distribution", "values": ["vmf"]}}
        ]}"#;
        assert!(SearchSpace::from_json_str(bad).is_err());

        let bad = r#"{"hyperparameters": [
            {"name": "lr", "type": "float", "lower": 0.0, "upper": 1.0, "log": true}
        ]}"#;
        assert!(SearchSpace::from_json_str(bad).is_err());
        Ok(())
    }
}
