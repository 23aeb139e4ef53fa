use crate::config::*;
use crate::config_space::SearchSpace;
use crate::evaluation::TrialResult;
use crate::lentil_input::CorpusData;
use crate::model_io::write_model;
use crate::trainer::Trainer;

use log::info;
use matrix_util::common_io::{mkdir, write_lines};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const RESULTS_FILE: &str = "results.json";

/// One configuration to train for `budget` epochs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialJob {
    pub id: usize,
    pub config: Configuration,
    pub budget: usize,
}

/// A finished job, one line of `results.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: usize,
    pub budget: usize,
    pub config: Configuration,
    pub result: TrialResult,
}

///
/// Black-box budget allocator: proposes rounds of jobs and is told
/// how each one did
///
pub trait BudgetOptimizer {
    /// next round of jobs, or `None` when the search is over
    fn propose(&mut self) -> Option<Vec<TrialJob>>;

    fn observe(&mut self, job: &TrialJob, result: &TrialResult);
}

///
/// Fixed rounds of freshly sampled configurations at one budget
///
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
    budget: usize,
    iterations: usize,
    configs_per_round: usize,
    round: usize,
    next_id: usize,
    best: Option<(usize, f64)>,
}

impl RandomSearch {
    ///
    /// * `space` - where configurations come from
    /// * `budget` - epochs per trial
    /// * `iterations` - number of rounds
    /// * `configs_per_round` - trials per round
    /// * `seed` - sampling seed
    ///
    pub fn new(
        space: SearchSpace,
        budget: usize,
        iterations: usize,
        configs_per_round: usize,
        seed: u64,
    ) -> anyhow::Result<Self> {
        if budget == 0 || configs_per_round == 0 {
            anyhow::bail!("budget and configurations per round must be positive");
        }
        Ok(Self {
            space,
            rng: StdRng::seed_from_u64(seed),
            budget,
            iterations,
            configs_per_round,
            round: 0,
            next_id: 0,
            best: None,
        })
    }

    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }
}

impl BudgetOptimizer for RandomSearch {
    fn propose(&mut self) -> Option<Vec<TrialJob>> {
        if self.round >= self.iterations {
            return None;
        }
        self.round += 1;
        let jobs = (0..self.configs_per_round)
            .map(|_| {
                let id = self.next_id;
                self.next_id += 1;
                TrialJob {
                    id,
                    config: self.space.sample(&mut self.rng),
                    budget: self.budget,
                }
            })
            .collect();
        Some(jobs)
    }

    fn observe(&mut self, job: &TrialJob, result: &TrialResult) {
        let better = match self.best {
            Some((_, loss)) => result.loss < loss,
            None => true,
        };
        if better {
            self.best = Some((job.id, result.loss));
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SearchResult {
    pub runs: Vec<RunRecord>,
}

impl SearchResult {
    ///
    /// Lowest loss among the runs at the highest budget reached
    ///
    pub fn incumbent(&self) -> Option<&RunRecord> {
        let max_budget = self.runs.iter().map(|r| r.budget).max()?;
        self.runs
            .iter()
            .filter(|r| r.budget == max_budget)
            .min_by(|a, b| a.result.loss.total_cmp(&b.result.loss))
    }

    /// total epochs spent over all runs
    pub fn total_budget(&self) -> usize {
        self.runs.iter().map(|r| r.budget).sum()
    }
}

///
/// Runs each proposed round on a bounded pool of workers; every
/// worker trains its own model over the shared corpus
///
pub struct SearchOrchestrator {
    corpus: Arc<CorpusData>,
    opts: RunOptions,
    num_workers: usize,
    save_dir: Option<Box<str>>,
}

impl SearchOrchestrator {
    pub fn new(corpus: Arc<CorpusData>, opts: RunOptions, num_workers: usize) -> Self {
        Self {
            corpus,
            opts,
            num_workers: num_workers.max(1),
            save_dir: None,
        }
    }

    /// write `results.json` under this directory
    pub fn with_save_dir(mut self, save_dir: &str) -> Self {
        self.save_dir = Some(save_dir.into());
        self
    }

    pub fn corpus(&self) -> &CorpusData {
        &self.corpus
    }

    fn results_file(&self) -> anyhow::Result<Option<Box<str>>> {
        match self.save_dir.as_deref() {
            Some(dir) => {
                let file: Box<str> = Path::new(dir)
                    .join(RESULTS_FILE)
                    .to_str()
                    .map(|s| s.into())
                    .ok_or(anyhow::anyhow!("invalid path under {}", dir))?;
                mkdir(&file)?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    fn job_options(&self, job: &TrialJob) -> RunOptions {
        let mut opts = self.opts.clone();
        opts.trace_file = opts
            .trace_file
            .as_deref()
            .map(|t| format!("{}.{}", t, job.id).into());
        opts.show_progress = false;
        opts
    }

    ///
    /// Ask `optimizer` for rounds until it stops, training each
    /// round's jobs in parallel. Configuration errors abort the
    /// search; diverged trials come back with the sentinel loss.
    ///
    pub fn run(&self, optimizer: &mut dyn BudgetOptimizer) -> anyhow::Result<SearchResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_workers)
            .build()?;

        let results_file = self.results_file()?;
        let mut lines: Vec<Box<str>> = vec![];
        let mut res = SearchResult::default();

        let mut round = 0;
        while let Some(jobs) = optimizer.propose() {
            info!("round {}: {} jobs", round, jobs.len());

            let outcomes: Vec<anyhow::Result<TrialResult>> = pool.install(|| {
                jobs.par_iter()
                    .map(|job| {
                        let opts = self.job_options(job);
                        Trainer::new(&self.corpus, &opts).train_trial(&job.config, job.budget)
                    })
                    .collect()
            });

            for (job, outcome) in jobs.into_iter().zip(outcomes) {
                let result = outcome?;
                info!(
                    "job {} [budget {}]: loss = {:.4}, perplexity = {:.2}",
                    job.id, job.budget, result.loss, result.info.test_perplexity
                );
                optimizer.observe(&job, &result);

                let record = RunRecord {
                    id: job.id,
                    budget: job.budget,
                    config: job.config,
                    result,
                };
                lines.push(serde_json::to_string(&record)?.into());
                res.runs.push(record);
            }

            if let Some(file) = results_file.as_deref() {
                write_lines(&lines, file)?;
            }
            round += 1;
        }

        if let Some(best) = res.incumbent() {
            info!("best configuration (loss = {:.4}): {:?}", best.result.loss, best.config);
        }
        info!("spent {} epochs over {} runs", res.total_budget(), res.runs.len());
        Ok(res)
    }

    ///
    /// Train the incumbent again at its budget and save it under
    /// `model_dir`
    ///
    pub fn retrain_incumbent(
        &self,
        res: &SearchResult,
        model_dir: &str,
    ) -> anyhow::Result<Option<TrialResult>> {
        let Some(best) = res.incumbent() else {
            return Ok(None);
        };
        info!("retraining job {} for {} epochs", best.id, best.budget);
        let trained = Trainer::new(&self.corpus, &self.opts).train_model(&best.config, best.budget)?;
        write_model(model_dir, &best.config, &trained, &self.corpus.vocab)?;
        Ok(Some(trained.result))
    }
}
