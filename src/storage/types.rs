use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Characters that close a sentence.
pub const SENTENCE_DELIMITERS: [char; 3] = ['.', '!', '?'];

pub fn is_delimiter(c: char) -> bool {
    SENTENCE_DELIMITERS.contains(&c)
}

/// One addressable unit of a file: ordered words plus an optional closing delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    pub words: Vec<String>,
    pub delimiter: Option<char>,
}

impl Sentence {
    /// Builds a sentence from draft words. A trailing `.`, `!` or `?` on the last
    /// word is lifted out as the delimiter; delimiters anywhere else stay in their word.
    pub fn from_words(mut words: Vec<String>) -> Self {
        words.retain(|w| !w.is_empty());

        let mut delimiter = None;
        if let Some(last) = words.last_mut()
            && let Some(c) = last.chars().last()
            && is_delimiter(c)
        {
            last.pop();
            delimiter = Some(c);
            if last.is_empty() {
                words.pop();
            }
        }

        Self { words, delimiter }
    }

    /// Words as a client sees them: the delimiter is glued to the last word.
    pub fn to_words(&self) -> Vec<String> {
        let mut words = self.words.clone();
        if let Some(d) = self.delimiter {
            match words.last_mut() {
                Some(last) => last.push(d),
                None => words.push(d.to_string()),
            }
        }
        words
    }

    pub fn render(&self) -> String {
        let mut out = self.words.join(" ");
        if let Some(d) = self.delimiter {
            out.push(d);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.delimiter.is_none()
    }
}

/// Sparse, ordered sentence index -> sentence.
pub type SentenceMap = BTreeMap<usize, Sentence>;

/// Renders sentences in index order, separated by single spaces.
pub fn render_sentences(sentences: &SentenceMap) -> String {
    sentences
        .values()
        .filter(|s| !s.is_empty())
        .map(Sentence::render)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sidecar metadata persisted next to each file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub owner: String,
    pub created_at: u64,
    /// Committed sentences with their indices. Absent in sidecars written by hand;
    /// the rendered content is re-parsed then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<SentenceMap>,
}

/// Lock table key: at most one HELD entry exists per (file, sentence).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub file: String,
    pub sentence: usize,
}

impl LockKey {
    pub fn new(file: &str, sentence: usize) -> Self {
        Self {
            file: file.to_string(),
            sentence,
        }
    }
}
