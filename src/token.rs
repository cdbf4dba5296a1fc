//! Token records and the stable tab-separated interchange formats.
//!
//! The unit of correction is a token: an original string from the noisy
//! text plus everything the pipeline derives for it (candidates, bin,
//! verdict). Tokens carry their document id and positional index so that
//! per-document output order survives parallel decoding.
//!
//! Three line-oriented formats are stable interfaces for downstream tools:
//!
//! - the k-best table: `Original` then k × (candidate, log-probability)
//!   columns, tab-separated, one header line;
//! - memorised corrections: `original<TAB>correction` lines;
//! - correction tracking: `original<TAB>final<TAB>count` lines, highest
//!   count first.
//!
//! Line breaks in the source text are kept as sentinel rows (`_NEWLINE_N_`
//! / `_NEWLINE_R_`) so the page layout can be reconstructed after
//! correction.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};

use tracing::warn;

use crate::decode::KBestItem;
use crate::dictionary::strip_punctuation;
use crate::heuristics::Verdict;
use crate::{Error, Result};

/// Sentinel for `\n` in the k-best table.
pub const NEWLINE_N: &str = "_NEWLINE_N_";
/// Sentinel for `\r` in the k-best table.
pub const NEWLINE_R: &str = "_NEWLINE_R_";

/// What kind of token this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A word: decoded and corrected.
    Word,
    /// Punctuation-only: passed through untouched.
    Punctuation,
    /// A line break: passed through, preserved for layout.
    Linebreak,
}

/// One token and its lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Document this token came from.
    pub doc_id: String,
    /// Position within the document's token stream.
    pub index: usize,
    /// The original (noisy) text.
    pub original: String,
    /// Word, punctuation, or line break.
    pub kind: TokenKind,
    /// Ranked candidates, filled by the decoder.
    pub kbest: Vec<KBestItem>,
    /// Assigned bin, filled by the heuristics.
    pub bin: Option<u8>,
    /// Outcome, filled by the corrector or an annotator.
    pub verdict: Option<Verdict>,
    /// Human-verified text, when known.
    pub gold: Option<String>,
    /// Token was rejoined across a hyphenated line break.
    pub hyphenated: bool,
    /// Token was consumed by a rejoin and should be dropped from output.
    pub discarded: bool,
    /// Decoding was skipped (e.g. the token was too large to decode).
    pub undecoded: bool,
}

impl Token {
    fn new(doc_id: &str, index: usize, original: &str, kind: TokenKind) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            index,
            original: original.to_string(),
            kind,
            kbest: Vec::new(),
            bin: None,
            verdict: None,
            gold: None,
            hyphenated: false,
            discarded: false,
            undecoded: false,
        }
    }

    /// A word token.
    pub fn word(doc_id: &str, index: usize, original: &str) -> Self {
        Self::new(doc_id, index, original, TokenKind::Word)
    }

    /// A punctuation-only token.
    pub fn punctuation(doc_id: &str, index: usize, original: &str) -> Self {
        Self::new(doc_id, index, original, TokenKind::Punctuation)
    }

    /// A line-break token.
    pub fn linebreak(doc_id: &str, index: usize, original: &str) -> Self {
        Self::new(doc_id, index, original, TokenKind::Linebreak)
    }

    /// True for word tokens that go through the decoder.
    pub fn is_word(&self) -> bool {
        self.kind == TokenKind::Word
    }

    /// The final text of this token, if resolved: the accepted correction
    /// for words, the original for pass-through kinds.
    pub fn final_text(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Punctuation | TokenKind::Linebreak => Some(&self.original),
            TokenKind::Word => match &self.verdict {
                Some(Verdict::Accept(correction)) => Some(&correction.text),
                _ => None,
            },
        }
    }
}

/// Split a document into tokens on whitespace, keeping `\n` and `\r` as
/// line-break tokens and classifying punctuation-only runs.
///
/// This is the boundary adapter for plain-text input; richer tokenizers
/// live upstream and feed [`Token`] records directly.
pub fn tokenize(doc_id: &str, text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let flush = |tokens: &mut Vec<Token>, current: &mut String| {
        if !current.is_empty() {
            let kind = if strip_punctuation(current).is_empty() {
                TokenKind::Punctuation
            } else {
                TokenKind::Word
            };
            tokens.push(Token::new(doc_id, tokens.len(), current, kind));
            current.clear();
        }
    };
    for c in text.chars() {
        if c.is_whitespace() {
            flush(&mut tokens, &mut current);
            if c == '\n' || c == '\r' {
                tokens.push(Token::linebreak(doc_id, tokens.len(), &c.to_string()));
            }
        } else {
            current.push(c);
        }
    }
    flush(&mut tokens, &mut current);
    tokens
}

fn sentinel(token: &Token) -> Option<&'static str> {
    match token.original.as_str() {
        "\n" => Some(NEWLINE_N),
        "\r" => Some(NEWLINE_R),
        _ => None,
    }
}

/// Write the k-best table: header, then one row per non-discarded token.
pub fn write_kbest_tsv<W: Write>(mut writer: W, tokens: &[Token], k: usize) -> Result<()> {
    let mut header = String::from("Original");
    for i in 1..=k {
        header.push_str(&format!("\t{i}-best\t{i}-best prob."));
    }
    writeln!(writer, "{header}")?;

    for token in tokens.iter().filter(|t| !t.discarded) {
        let original = sentinel(token).unwrap_or(&token.original);
        let mut row = String::from(original);
        for i in 0..k {
            match (token.kind, token.kbest.get(i)) {
                (TokenKind::Word, Some(item)) => {
                    row.push_str(&format!("\t{}\t{}", item.candidate, item.log_prob));
                }
                (TokenKind::Word, None) => row.push_str("\t\t-inf"),
                // Pass-through rows repeat the original, as downstream
                // tools expect a full-width table.
                _ => row.push_str(&format!("\t{original}\t0")),
            }
        }
        writeln!(writer, "{row}")?;
    }
    Ok(())
}

/// Parse a k-best table back into (original, candidates) rows. Sentinel
/// rows come back verbatim; the caller decides how to treat them.
pub fn read_kbest_tsv<R: Read>(reader: R) -> Result<Vec<(String, Vec<KBestItem>)>> {
    let mut lines = BufReader::new(reader).lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok(Vec::new()),
    };
    let columns = header.split('\t').count();
    if columns < 3 || columns % 2 == 0 {
        return Err(Error::MalformedRecord {
            line: 1,
            reason: format!("header has {columns} columns, expected 1 + 2k"),
        });
    }
    let k = (columns - 1) / 2;

    let mut rows = Vec::new();
    for (lineno, line) in lines.enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns {
            return Err(Error::MalformedRecord {
                line: lineno + 2,
                reason: format!("{} columns, expected {columns}", fields.len()),
            });
        }
        let mut kbest = Vec::with_capacity(k);
        for i in 0..k {
            let candidate = fields[1 + 2 * i].to_string();
            let log_prob: f64 = fields[2 + 2 * i].parse().map_err(|_| Error::MalformedRecord {
                line: lineno + 2,
                reason: format!("bad probability {:?}", fields[2 + 2 * i]),
            })?;
            kbest.push(KBestItem { candidate, log_prob });
        }
        rows.push((fields[0].to_string(), kbest));
    }
    Ok(rows)
}

/// Read a memorised-corrections table (`original<TAB>correction` lines).
/// Malformed lines are reported and skipped.
pub fn read_memos<R: Read>(reader: R) -> Result<BTreeMap<String, String>> {
    let mut memos = BTreeMap::new();
    for (lineno, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((original, correction)) if !original.is_empty() => {
                memos.insert(original.to_string(), correction.to_string());
            }
            _ => warn!(line = lineno + 1, "skipping malformed memo line"),
        }
    }
    Ok(memos)
}

/// Write a memorised-corrections table.
pub fn write_memos<W: Write>(mut writer: W, memos: &BTreeMap<String, String>) -> Result<()> {
    for (original, correction) in memos {
        writeln!(writer, "{original}\t{correction}")?;
    }
    Ok(())
}

/// Write correction-tracking counts, most frequent first (ties in
/// lexicographic order for determinism).
pub fn write_tracking<W: Write>(
    mut writer: W,
    tracking: &BTreeMap<(String, String), u64>,
) -> Result<()> {
    let mut entries: Vec<(&(String, String), &u64)> = tracking.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for ((original, corrected), count) in entries {
        writeln!(writer, "{original}\t{corrected}\t{count}")?;
    }
    Ok(())
}

/// Read correction-tracking counts. Malformed lines are reported and
/// skipped.
pub fn read_tracking<R: Read>(reader: R) -> Result<BTreeMap<(String, String), u64>> {
    let mut tracking = BTreeMap::new();
    for (lineno, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [original, corrected, count] => match count.parse::<u64>() {
                Ok(count) => {
                    tracking.insert((original.to_string(), corrected.to_string()), count);
                }
                Err(_) => warn!(line = lineno + 1, "skipping tracking line with bad count"),
            },
            _ => warn!(line = lineno + 1, "skipping malformed tracking line"),
        }
    }
    Ok(tracking)
}
