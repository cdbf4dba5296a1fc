//! The batch correction pipeline.
//!
//! Wires the decoder, cache, dictionary, and heuristics together over a
//! token stream. Decoding is embarrassingly parallel and fans out over a
//! worker pool; everything that mutates session state (binning tallies,
//! memoized annotator answers, the temp dictionary) runs serially between
//! the parallel phases. Per-document token order is never changed: results
//! are written back by positional index.
//!
//! Annotator answers are memoized by original string: once a human decides
//! `"tne" → "the"`, every later `"tne"` in the session auto-resolves. Each
//! answer also lands in a session temp dictionary, published to subsequent
//! tokens as a copy-on-write snapshot -- workers only ever see immutable
//! dictionaries.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::cache::{cache_key, DecodingCache};
use crate::decode::{Decoder, KBestItem, SubstitutionRules};
use crate::dictionary::{strip_punctuation, Dictionary};
use crate::heuristics::{Correction, Heuristics, Policy, Source, Verdict};
use crate::model::Hmm;
use crate::token::{Token, TokenKind};

/// Give up on decoding a single token beyond this many (time × state² × k)
/// DP cells and mark it undecoded instead of thrashing the allocator.
const DECODE_CELL_BUDGET: u64 = 100_000_000;

/// Knobs for a correction run.
#[derive(Debug, Clone)]
pub struct CorrectorConfig {
    /// Candidates per token.
    pub k: usize,
    /// Per-bin action map.
    pub policy: Policy,
    /// Multi-character substitution rules.
    pub rules: SubstitutionRules,
    /// Rejoin `word-` + line break + `rest` before decoding.
    pub combine_hyphenated: bool,
    /// Drop spurious in-word hyphens from accepted corrections.
    pub dehyphenate: bool,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            k: 4,
            policy: Policy::default(),
            rules: SubstitutionRules::default(),
            combine_hyphenated: true,
            dehyphenate: false,
        }
    }
}

/// Tallies from one correction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Word tokens seen.
    pub words: u64,
    /// Punctuation and line-break tokens passed through.
    pub passthrough: u64,
    /// Word tokens per bin (index 0 is bin 1).
    pub bins: [u64; 9],
    /// Word tokens resolved without an annotator.
    pub resolved: u64,
    /// Word tokens deferred to an annotator.
    pub annotator_required: u64,
    /// Word tokens auto-resolved from memorised corrections.
    pub memoized: u64,
    /// Word tokens skipped as too large to decode.
    pub undecoded: u64,
}

impl RunStats {
    /// A short plain-text summary: bin population and annotator workload.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} word tokens, {} passed through\n",
            self.words, self.passthrough
        ));
        let binned: u64 = self.bins.iter().sum();
        for (i, &count) in self.bins.iter().enumerate() {
            let share = if binned > 0 {
                100.0 * count as f64 / binned as f64
            } else {
                0.0
            };
            out.push_str(&format!("bin {}: {count:8} tokens ({share:5.1}%)\n", i + 1));
        }
        out.push_str(&format!(
            "resolved {} / memoized {} / annotator required {} / undecoded {}\n",
            self.resolved, self.memoized, self.annotator_required, self.undecoded
        ));
        out
    }
}

/// Batch corrector over a shared model.
#[derive(Debug)]
pub struct Corrector {
    decoder: Decoder,
    cache: DecodingCache,
    heuristics: Heuristics,
    dict: Arc<Dictionary>,
    memos: BTreeMap<String, String>,
    tracking: BTreeMap<(String, String), u64>,
    combine_hyphenated: bool,
    dehyphenate: bool,
}

impl Corrector {
    /// A corrector over a trained model and a dictionary.
    pub fn new(hmm: Arc<Hmm>, dictionary: Dictionary, config: CorrectorConfig) -> Self {
        Self {
            decoder: Decoder::new(hmm, config.rules, config.k),
            cache: DecodingCache::new(),
            heuristics: Heuristics::new(config.policy),
            dict: Arc::new(dictionary),
            memos: BTreeMap::new(),
            tracking: BTreeMap::new(),
            combine_hyphenated: config.combine_hyphenated,
            dehyphenate: config.dehyphenate,
        }
    }

    /// Pre-seed memorised corrections (e.g. from a previous session's
    /// table).
    pub fn with_memos(mut self, memos: BTreeMap<String, String>) -> Self {
        self.memos = memos;
        self
    }

    /// The current dictionary snapshot (grows as annotations arrive).
    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dict
    }

    /// Memorised corrections accumulated so far.
    pub fn memos(&self) -> &BTreeMap<String, String> {
        &self.memos
    }

    /// Correction counts per (original, final) pair.
    pub fn tracking(&self) -> &BTreeMap<(String, String), u64> {
        &self.tracking
    }

    /// The decoder in use.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// The decoding cache (shared across runs of this corrector).
    pub fn cache(&self) -> &DecodingCache {
        &self.cache
    }

    /// Run the full pipeline over one document's tokens: hyphen rejoining,
    /// parallel decoding, binning, policy resolution.
    pub fn correct_tokens(&mut self, tokens: &mut Vec<Token>) -> RunStats {
        if self.combine_hyphenated {
            combine_hyphenated(tokens, &self.dict);
        }
        self.decode_tokens(tokens);
        let stats = self.bin_tokens(tokens);
        if self.dehyphenate {
            let dict = Arc::clone(&self.dict);
            for token in tokens.iter_mut().filter(|t| t.is_word() && !t.discarded) {
                if let Some(Verdict::Accept(correction)) = &mut token.verdict {
                    if let Some(fixed) = dehyphenate(&dict, &correction.text) {
                        correction.text = fixed;
                    }
                }
            }
        }
        info!(
            words = stats.words,
            annotator = stats.annotator_required,
            "finished correction pass"
        );
        stats
    }

    /// Decode every word token, fanning out over the worker pool. Results
    /// land back on the tokens by index, so order is preserved. Tokens over
    /// the DP cell budget are marked undecoded and skipped.
    pub fn decode_tokens(&self, tokens: &mut [Token]) {
        let hmm_fp = self.decoder.hmm().fingerprint().to_string();
        let rules_fp = self.decoder.rules().fingerprint();
        let k = self.decoder.k();
        let states = self.decoder.hmm().alphabet().len() as u64;

        let results: Vec<(usize, Option<Arc<Vec<KBestItem>>>)> = tokens
            .par_iter()
            .enumerate()
            .filter(|(_, token)| token.is_word() && !token.discarded)
            .map(|(i, token)| {
                let len = token.original.chars().count() as u64;
                if len * states * states * k as u64 > DECODE_CELL_BUDGET {
                    warn!(token = %token.original, "token too large to decode");
                    return (i, None);
                }
                let key = cache_key(&token.original, &hmm_fp, &rules_fp, k);
                let kbest = self
                    .cache
                    .get_or_compute(&key, || self.decoder.decode(&token.original));
                (i, Some(kbest))
            })
            .collect();

        for (i, result) in results {
            match result {
                Some(kbest) => tokens[i].kbest = (*kbest).clone(),
                None => tokens[i].undecoded = true,
            }
        }
    }

    /// Bin decoded tokens and apply the policy. Memorised corrections
    /// short-circuit the heuristics entirely.
    pub fn bin_tokens(&mut self, tokens: &mut [Token]) -> RunStats {
        let dict = Arc::clone(&self.dict);
        let mut stats = RunStats::default();
        for token in tokens.iter_mut().filter(|t| !t.discarded) {
            if !token.is_word() {
                stats.passthrough += 1;
                continue;
            }
            stats.words += 1;
            if token.undecoded {
                stats.undecoded += 1;
                continue;
            }
            if let Some(correction) = self.memos.get(&token.original) {
                token.verdict = Some(Verdict::Accept(Correction {
                    text: correction.clone(),
                    source: Source::Memo,
                }));
                *self
                    .tracking
                    .entry((token.original.clone(), correction.clone()))
                    .or_default() += 1;
                stats.memoized += 1;
                stats.resolved += 1;
                continue;
            }

            let (bin, verdict) = self.heuristics.evaluate(&token.original, &token.kbest, &dict);
            token.bin = Some(bin);
            stats.bins[bin as usize - 1] += 1;
            match &verdict {
                Verdict::Accept(correction) => {
                    *self
                        .tracking
                        .entry((token.original.clone(), correction.text.clone()))
                        .or_default() += 1;
                    stats.resolved += 1;
                }
                Verdict::NeedsAnnotation { .. } => stats.annotator_required += 1,
            }
            token.verdict = Some(verdict);
        }
        stats
    }

    /// Record a human answer for a deferred token.
    ///
    /// The answer is memoized for the rest of the session, counted in the
    /// correction tracking, and its cleaned form joins the temp dictionary
    /// through a fresh copy-on-write snapshot.
    pub fn apply_annotation(&mut self, token: &mut Token, text: &str) {
        token.verdict = Some(Verdict::Accept(Correction {
            text: text.to_string(),
            source: Source::Annotator,
        }));
        self.memos
            .insert(token.original.clone(), text.to_string());
        *self
            .tracking
            .entry((token.original.clone(), text.to_string()))
            .or_default() += 1;

        let clean = strip_punctuation(&text.to_lowercase());
        if !clean.is_empty() && !self.dict.contains(&clean) {
            let mut next = (*self.dict).clone();
            next.add(&clean);
            self.dict = Arc::new(next);
        }
    }
}

/// Rejoin `word-` + line break + `rest` into one token when the joined
/// form passes the dictionary, the split form does not, and the
/// continuation starts lowercase. The consumed tokens are marked discarded.
fn combine_hyphenated(tokens: &mut Vec<Token>, dict: &Dictionary) {
    for i in 0..tokens.len().saturating_sub(2) {
        let (current, linebreak, next) = (&tokens[i], &tokens[i + 1], &tokens[i + 2]);
        if current.kind != TokenKind::Word
            || linebreak.kind != TokenKind::Linebreak
            || next.kind != TokenKind::Word
            || current.discarded
            || linebreak.discarded
            || next.discarded
        {
            continue;
        }
        if !current.original.ends_with('-') || current.original.chars().count() < 2 {
            continue;
        }
        if !next
            .original
            .chars()
            .next()
            .is_some_and(char::is_lowercase)
        {
            continue;
        }
        let joined = format!(
            "{}{}",
            &current.original[..current.original.len() - 1],
            next.original
        );
        if dict.contains(&strip_punctuation(&current.original))
            || !dict.contains(&strip_punctuation(&joined))
        {
            continue;
        }
        tokens[i].original = joined;
        tokens[i].hyphenated = true;
        tokens[i + 1].discarded = true;
        tokens[i + 2].discarded = true;
    }
    tokens.retain(|t| !t.discarded);
}

/// Drop in-word hyphens that the dictionary says should not be there:
/// `exam-ple` becomes `example` when only the dashless form is a word.
/// The hyphen must be word-internal and not introduce a capitalized
/// continuation (those are usually genuine compounds or names).
fn dehyphenate(dict: &Dictionary, word: &str) -> Option<String> {
    if !word.contains('-') || word.starts_with('-') || word.ends_with('-') {
        return None;
    }
    let dashless = strip_punctuation(word);
    if dashless.is_empty() {
        return None;
    }
    let after = word.split_once('-').map(|(_, rest)| rest)?;
    if after.chars().next().is_some_and(char::is_uppercase) {
        return None;
    }
    let known = |w: &str| dict.contains(w) || dict.contains(&w.to_lowercase());
    // A hyphenated form the dictionary already knows is left alone; only
    // then does the joined form get a say.
    if known(word) {
        return None;
    }
    if known(&dashless) {
        Some(word.replace('-', ""))
    } else {
        None
    }
}

/// Assemble the final text of a corrected token stream, preserving line
/// breaks and using originals for anything unresolved.
pub fn corrected_text(tokens: &[Token]) -> String {
    let mut pieces: Vec<&str> = Vec::new();
    for token in tokens.iter().filter(|t| !t.discarded) {
        match token.kind {
            TokenKind::Linebreak => pieces.push("\n"),
            _ => pieces.push(token.final_text().unwrap_or(&token.original)),
        }
    }
    pieces
        .join(" ")
        .replace(" \n ", "\n")
        .replace(" \n", "\n")
        .replace("\n ", "\n")
}
