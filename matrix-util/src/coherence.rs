use crate::sparse_bow::BowMatrix;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

///
/// Normalized pointwise mutual information of term pairs, with
/// probabilities estimated from document co-occurrence.
///
/// For terms `i`, `j` with document frequencies `p(i)`, `p(j)` and
/// joint `p(i,j)`:
///
///   npmi = log(p(i,j) / (p(i) p(j))) / -log(p(i,j))
///
/// Pairs that never co-occur score -1; pairs present in every
/// document score 1.
///
pub struct NpmiEvaluator {
    n_docs: usize,
    doc_terms: Vec<HashSet<usize>>,
}

impl NpmiEvaluator {
    pub fn new(bow: &BowMatrix) -> Self {
        let doc_terms = bow
            .doc_term_sets()
            .into_iter()
            .map(|x| x.into_iter().collect())
            .collect();
        Self {
            n_docs: bow.num_docs(),
            doc_terms,
        }
    }

    ///
    /// Average NPMI over all pairs within each topic, then averaged
    /// over topics
    ///
    /// * `topics` - top-k term indexes per topic
    ///
    pub fn evaluate(&self, topics: &[Vec<usize>]) -> f64 {
        if topics.is_empty() {
            return 0.0;
        }
        let scores: Vec<f64> = topics.par_iter().map(|t| self.topic_npmi(t)).collect();
        scores.iter().sum::<f64>() / scores.len() as f64
    }

    pub fn topic_npmi(&self, terms: &[usize]) -> f64 {
        let df = self.doc_freqs(terms);
        let mut tot = 0_f64;
        let mut npairs = 0_usize;
        for a in 0..terms.len() {
            for b in (a + 1)..terms.len() {
                tot += self.pair_npmi(terms[a], terms[b], &df);
                npairs += 1;
            }
        }
        if npairs > 0 {
            tot / npairs as f64
        } else {
            0.0
        }
    }

    fn doc_freqs(&self, terms: &[usize]) -> HashMap<usize, usize> {
        let mut df: HashMap<usize, usize> = terms.iter().map(|&t| (t, 0)).collect();
        for doc in self.doc_terms.iter() {
            for (t, n) in df.iter_mut() {
                if doc.contains(t) {
                    *n += 1;
                }
            }
        }
        df
    }

    fn pair_npmi(&self, i: usize, j: usize, df: &HashMap<usize, usize>) -> f64 {
        let n_ij = self
            .doc_terms
            .iter()
            .filter(|doc| doc.contains(&i) && doc.contains(&j))
            .count();

        if n_ij == 0 || self.n_docs == 0 {
            return -1.0;
        }

        let nn = self.n_docs as f64;
        let p_ij = n_ij as f64 / nn;
        if p_ij >= 1.0 {
            return 1.0;
        }
        let p_i = df[&i] as f64 / nn;
        let p_j = df[&j] as f64 / nn;
        (p_ij / (p_i * p_j)).ln() / -p_ij.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npmi_extremes() -> anyhow::Result<()> {
        // terms 0,1 always together; 2 and 3 never together
        let docs = vec![vec![0, 1, 2], vec![0, 1, 3], vec![0, 1, 2], vec![0, 1, 3]];
        let bow = BowMatrix::from_token_ids(&docs, 4)?;
        let eval = NpmiEvaluator::new(&bow);

        approx::assert_abs_diff_eq!(eval.topic_npmi(&[0, 1]), 1.0);
        approx::assert_abs_diff_eq!(eval.topic_npmi(&[2, 3]), -1.0);

        // p(0,2) = p(2) = 1/2, p(0) = 1 -> log(1) / -log(1/2) = 0
        approx::assert_abs_diff_eq!(eval.topic_npmi(&[0, 2]), 0.0, epsilon = 1e-12);

        let avg = eval.evaluate(&[vec![0, 1], vec![2, 3]]);
        approx::assert_abs_diff_eq!(avg, 0.0, epsilon = 1e-12);
        Ok(())
    }
}
