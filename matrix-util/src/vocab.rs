use crate::common_io::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

///
/// Term index <-> token mapping with optional corpus counts.
///
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    idx_to_token: Vec<Box<str>>,
    token_to_idx: HashMap<Box<str>, usize>,
    #[serde(default)]
    counts: Vec<f32>,
}

impl Vocabulary {
    pub fn from_tokens<T: AsRef<str>>(tokens: &[T]) -> anyhow::Result<Self> {
        let idx_to_token: Vec<Box<str>> = tokens
            .iter()
            .map(|x| x.as_ref().to_owned().into_boxed_str())
            .collect();
        let mut token_to_idx = HashMap::with_capacity(idx_to_token.len());
        for (j, t) in idx_to_token.iter().enumerate() {
            if token_to_idx.insert(t.clone(), j).is_some() {
                anyhow::bail!("duplicate token `{}` in vocabulary", t);
            }
        }
        Ok(Self {
            idx_to_token,
            token_to_idx,
            counts: vec![],
        })
    }

    pub fn with_counts(mut self, counts: Vec<f32>) -> anyhow::Result<Self> {
        if counts.len() != self.len() {
            anyhow::bail!("{} counts for {} tokens", counts.len(), self.len());
        }
        self.counts = counts;
        Ok(self)
    }

    ///
    /// Read one `token [count]` per line
    ///
    /// * `input_file` - file name--either gzipped or not
    ///
    pub fn read_vocab_file(input_file: &str) -> anyhow::Result<Self> {
        let words = read_lines_of_words(input_file)?;
        let tokens: Vec<&str> = words.iter().map(|w| w[0].as_ref()).collect();
        let counts = words
            .iter()
            .map(|w| w.get(1).and_then(|c| c.parse::<f32>().ok()))
            .collect::<Option<Vec<f32>>>();

        let vocab = Self::from_tokens(&tokens)?;
        info!("read {} tokens from {}", vocab.len(), input_file);

        match counts {
            Some(counts) => vocab.with_counts(counts),
            None => Ok(vocab),
        }
    }

    pub fn from_json(json_file: &str) -> anyhow::Result<Self> {
        let reader = open_buf_reader(json_file)?;
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json(&self, json_file: &str) -> anyhow::Result<()> {
        with_buf_writer(json_file, |writer| Ok(serde_json::to_writer(writer, self)?))
    }

    pub fn len(&self) -> usize {
        self.idx_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx_to_token.is_empty()
    }

    pub fn token(&self, idx: usize) -> Option<&str> {
        self.idx_to_token.get(idx).map(|x| x.as_ref())
    }

    pub fn index(&self, token: &str) -> Option<usize> {
        self.token_to_idx.get(token).copied()
    }

    pub fn tokens(&self) -> &[Box<str>] {
        &self.idx_to_token
    }

    pub fn counts(&self) -> &[f32] {
        &self.counts
    }

    ///
    /// Map tokens to indexes, silently dropping unknown ones
    ///
    pub fn to_indices<T: AsRef<str>>(&self, tokens: &[T]) -> Vec<usize> {
        tokens
            .iter()
            .filter_map(|t| self.index(t.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocab_json_and_lookup() -> anyhow::Result<()> {
        let vocab = Vocabulary::from_tokens(&["apple", "banana", "cherry"])?
            .with_counts(vec![3.0, 2.0, 1.0])?;

        assert_eq!(vocab.index("banana"), Some(1));
        assert_eq!(vocab.token(2), Some("cherry"));
        assert_eq!(vocab.to_indices(&["cherry", "durian", "apple"]), vec![2, 0]);

        let dir = tempfile::tempdir()?;
        let json_file = dir.path().join("vocab.json");
        let json_file = json_file.to_string_lossy();
        vocab.to_json(&json_file)?;
        let other = Vocabulary::from_json(&json_file)?;
        assert_eq!(other.tokens(), vocab.tokens());
        assert_eq!(other.counts(), vocab.counts());
        assert_eq!(other.index("apple"), Some(0));
        Ok(())
    }

    #[test]
    fn duplicate_tokens_rejected() {
        assert!(Vocabulary::from_tokens(&["a", "b", "a"]).is_err());
    }
}
