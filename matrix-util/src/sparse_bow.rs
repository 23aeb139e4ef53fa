use crate::common_io::*;
use log::info;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use std::io::Write;

///
/// Document-term count matrix: each row is one document's
/// bag-of-words vector over the vocabulary columns.
///
/// Read-only once built; trials share it by reference.
///
#[derive(Clone, Debug)]
pub struct BowMatrix {
    csr: CsrMatrix<f32>,
    labels: Option<Vec<i64>>,
}

impl BowMatrix {
    pub fn from_csr(csr: CsrMatrix<f32>, labels: Option<Vec<i64>>) -> anyhow::Result<Self> {
        if let Some(labels) = labels.as_ref() {
            if labels.len() != csr.nrows() {
                anyhow::bail!(
                    "{} labels for {} documents",
                    labels.len(),
                    csr.nrows()
                );
            }
        }
        if csr.values().iter().any(|&x| !(x >= 0.0)) {
            anyhow::bail!("bag-of-words counts must be non-negative");
        }
        Ok(Self { csr, labels })
    }

    ///
    /// Build from (doc, term, count) triplets; duplicated entries
    /// are summed
    ///
    /// * `n_docs` - number of documents (rows)
    /// * `n_terms` - vocabulary size (columns)
    /// * `triplets` - non-zero entries
    /// * `labels` - optional per-document labels
    ///
    pub fn from_triplets(
        n_docs: usize,
        n_terms: usize,
        triplets: &[(usize, usize, f32)],
        labels: Option<Vec<i64>>,
    ) -> anyhow::Result<Self> {
        let mut coo = CooMatrix::<f32>::new(n_docs, n_terms);
        for &(i, j, x) in triplets {
            if i >= n_docs || j >= n_terms {
                anyhow::bail!(
                    "entry ({}, {}) out of bounds ({} x {})",
                    i,
                    j,
                    n_docs,
                    n_terms
                );
            }
            coo.push(i, j, x);
        }
        Self::from_csr(CsrMatrix::from(&coo), labels)
    }

    ///
    /// Count token ids of each document into a bag-of-words matrix
    ///
    /// * `docs` - token ids per document
    /// * `n_terms` - vocabulary size
    ///
    pub fn from_token_ids(docs: &[Vec<usize>], n_terms: usize) -> anyhow::Result<Self> {
        let triplets: Vec<(usize, usize, f32)> = docs
            .iter()
            .enumerate()
            .flat_map(|(i, toks)| toks.iter().map(move |&j| (i, j, 1_f32)))
            .collect();
        Self::from_triplets(docs.len(), n_terms, &triplets, None)
    }

    ///
    /// Read a sparse vector file; each line is one document:
    /// `[label] idx:count idx:count ...` with 0-based term indexes.
    /// Labels are kept only if every document carries one.
    ///
    /// * `input_file` - file name--either gzipped or not
    /// * `n_terms` - vocabulary size
    ///
    pub fn read_sparse_vec_file(input_file: &str, n_terms: usize) -> anyhow::Result<Self> {
        let lines = read_lines(input_file)?;

        let parsed = lines
            .par_iter()
            .enumerate()
            .map(|(i, line)| parse_sparse_vec_line(line).map(|x| (i, x)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut labels = Vec::with_capacity(parsed.len());
        let mut triplets = vec![];
        for (i, (label, entries)) in parsed {
            labels.push(label);
            triplets.extend(entries.into_iter().map(|(j, x)| (i, j, x)));
        }

        let labels = if labels.iter().all(|x| x.is_some()) {
            Some(labels.into_iter().flatten().collect())
        } else {
            None
        };

        info!(
            "read {} documents, {} non-zero entries from {}",
            lines.len(),
            triplets.len(),
            input_file
        );

        Self::from_triplets(lines.len(), n_terms, &triplets, labels)
    }

    ///
    /// Write down in the same sparse vector format that
    /// `read_sparse_vec_file` takes
    ///
    pub fn write_sparse_vec_file(&self, output_file: &str) -> anyhow::Result<()> {
        with_buf_writer(output_file, |buf| {
            for (i, row) in self.csr.row_iter().enumerate() {
                let mut line = match self.labels.as_ref() {
                    Some(labels) => labels[i].to_string(),
                    None => String::new(),
                };
                for (j, x) in row.col_indices().iter().zip(row.values()) {
                    if !line.is_empty() {
                        line.push(' ');
                    }
                    line.push_str(&format!("{}:{}", j, x));
                }
                writeln!(buf, "{}", line)?;
            }
            Ok(())
        })
    }

    pub fn csr(&self) -> &CsrMatrix<f32> {
        &self.csr
    }

    pub fn labels(&self) -> Option<&[i64]> {
        self.labels.as_deref()
    }

    pub fn num_docs(&self) -> usize {
        self.csr.nrows()
    }

    pub fn num_terms(&self) -> usize {
        self.csr.ncols()
    }

    /// number of tokens in each document
    pub fn doc_lengths(&self) -> Vec<f32> {
        self.csr
            .row_iter()
            .map(|row| row.values().iter().sum())
            .collect()
    }

    /// total count of each term over all documents
    pub fn term_counts(&self) -> Vec<f32> {
        self.term_counts_first(self.num_docs())
    }

    ///
    /// Total count of each term over the first `max_docs` documents
    ///
    pub fn term_counts_first(&self, max_docs: usize) -> Vec<f32> {
        let mut ret = vec![0_f32; self.num_terms()];
        for row in self.csr.row_iter().take(max_docs) {
            for (&j, &x) in row.col_indices().iter().zip(row.values()) {
                ret[j] += x;
            }
        }
        ret
    }

    /// total number of tokens
    pub fn total_words(&self) -> f64 {
        self.csr.values().iter().map(|&x| x as f64).sum()
    }

    ///
    /// Take the selected rows as a dense row-major vector of
    /// length `rows.len() * num_terms()`
    ///
    pub fn rows_dense(&self, rows: &[usize]) -> Vec<f32> {
        let n_terms = self.num_terms();
        let mut ret = vec![0_f32; rows.len() * n_terms];
        for (r, &i) in rows.iter().enumerate() {
            let row = self.csr.row(i);
            for (&j, &x) in row.col_indices().iter().zip(row.values()) {
                ret[r * n_terms + j] = x;
            }
        }
        ret
    }

    ///
    /// Set of terms present in each document
    ///
    pub fn doc_term_sets(&self) -> Vec<Vec<usize>> {
        self.csr
            .row_iter()
            .map(|row| {
                row.col_indices()
                    .iter()
                    .zip(row.values())
                    .filter(|(_, &x)| x > 0.0)
                    .map(|(&j, _)| j)
                    .collect()
            })
            .collect()
    }
}

type SparseVecLine = (Option<i64>, Vec<(usize, f32)>);

fn parse_sparse_vec_line(line: &str) -> anyhow::Result<SparseVecLine> {
    let mut label = None;
    let mut entries = vec![];
    for (k, word) in line.split_whitespace().enumerate() {
        match word.split_once(':') {
            Some((j, x)) => {
                let j = j
                    .parse::<usize>()
                    .map_err(|e| anyhow::anyhow!("bad index `{}`: {}", word, e))?;
                let x = x
                    .parse::<f32>()
                    .map_err(|e| anyhow::anyhow!("bad count `{}`: {}", word, e))?;
                entries.push((j, x));
            }
            None if k == 0 => {
                let y = word
                    .parse::<f64>()
                    .map_err(|e| anyhow::anyhow!("bad label `{}`: {}", word, e))?;
                label = Some(y as i64);
            }
            None => anyhow::bail!("expected `idx:count`, found `{}`", word),
        }
    }
    Ok((label, entries))
}
