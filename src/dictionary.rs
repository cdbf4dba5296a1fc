//! Word dictionary for candidate checking.
//!
//! A flat set of known-good words, loaded one word per line. Membership
//! tests honor a global case-sensitivity flag fixed at construction; in the
//! insensitive mode everything is folded to lowercase on the way in and on
//! lookup.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read, Write};

use tracing::warn;

use crate::Result;

/// A finite set of words with a case-sensitivity policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    words: BTreeSet<String>,
    case_sensitive: bool,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Dictionary {
    /// An empty dictionary.
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            words: BTreeSet::new(),
            case_sensitive,
        }
    }

    /// Load from a one-word-per-line source. Entries containing interior
    /// whitespace are malformed: reported and skipped. Blank lines are
    /// ignored.
    pub fn from_reader<R: Read>(reader: R, case_sensitive: bool) -> Result<Self> {
        let mut dict = Self::new(case_sensitive);
        for (lineno, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let entry = line.trim_end_matches('\r');
            if entry.is_empty() {
                continue;
            }
            if entry.chars().any(char::is_whitespace) {
                warn!(line = lineno + 1, entry, "skipping dictionary entry with whitespace");
                continue;
            }
            dict.add(entry);
        }
        Ok(dict)
    }

    /// Whether lookups are case-sensitive.
    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Add a word (folded to lowercase in the insensitive mode). Empty
    /// strings are ignored.
    pub fn add(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }
        if self.case_sensitive {
            self.words.insert(word.to_string());
        } else {
            self.words.insert(word.to_lowercase());
        }
    }

    /// Membership test under the case policy. The empty string is never a
    /// member.
    pub fn contains(&self, word: &str) -> bool {
        if word.is_empty() {
            return false;
        }
        if self.case_sensitive {
            self.words.contains(word)
        } else {
            self.words.contains(&word.to_lowercase())
        }
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True if no words are loaded.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    /// Write one word per line, sorted.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for word in &self.words {
            writeln!(writer, "{word}")?;
        }
        Ok(())
    }
}

/// Punctuation found glued onto tokens in OCR text, including the
/// typographic marks common in historical print.
fn is_token_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '\u{ad}' | '‘' | '’' | '“' | '”' | '‚' | '„' | '–' | '—' | '…' | '¡' | '¿' | '«' | '»'
        )
}

/// Drop punctuation from a token before a dictionary probe, so `"(word)."`
/// checks as `"word"`.
pub fn strip_punctuation(word: &str) -> String {
    word.chars().filter(|&c| !is_token_punctuation(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_skips_malformed_entries() {
        let data = "word\n\ntwo words\nother\r\n";
        let dict = Dictionary::from_reader(data.as_bytes(), true).unwrap();
        assert_eq!(dict.len(), 2);
        assert!(dict.contains("word"));
        assert!(dict.contains("other"));
        assert!(!dict.contains("two words"));
    }

    #[test]
    fn case_folding_follows_the_flag() {
        let mut sensitive = Dictionary::new(true);
        sensitive.add("Wagon");
        assert!(sensitive.contains("Wagon"));
        assert!(!sensitive.contains("wagon"));

        let mut insensitive = Dictionary::new(false);
        insensitive.add("Wagon");
        assert!(insensitive.contains("wagon"));
        assert!(insensitive.contains("WAGON"));
    }

    #[test]
    fn empty_string_is_never_a_member() {
        let mut dict = Dictionary::new(true);
        dict.add("");
        assert!(dict.is_empty());
        assert!(!dict.contains(""));
    }

    #[test]
    fn punctuation_stripping() {
        assert_eq!(strip_punctuation("(word)."), "word");
        assert_eq!(strip_punctuation("don’t"), "dont");
        assert_eq!(strip_punctuation("—"), "");
        assert_eq!(strip_punctuation("hyphen-ated"), "hyphenated");
    }

    #[test]
    fn round_trips_through_a_writer() {
        let mut dict = Dictionary::new(true);
        for w in ["beta", "alpha", "gamma"] {
            dict.add(w);
        }
        let mut out = Vec::new();
        dict.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "alpha\nbeta\ngamma\n");
    }
}
