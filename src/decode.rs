//! k-best Viterbi decoding of noisy tokens.
//!
//! Given the trained [`Hmm`] and a noisy token w, find the k gold strings
//! most likely to have been read as w. This is Viterbi decoding where every
//! state is a gold character and the observation sequence is the token,
//! extended two ways:
//!
//! 1. **k-best**: each state keeps its k best partial paths per time step
//!    (rank dimension), not just the single best.
//! 2. **Multi-character substitutions**: rules like `rn → m` describe
//!    confusions the 1-to-1 channel model cannot express. After Viterbi,
//!    each rule occurrence in w generates a rewrite hypothesis which is
//!    scored under the model and merged into the candidate list.
//!
//! All arithmetic is in natural-log space; products of probabilities become
//! sums, so tokens of any practical length cannot underflow. Ties are broken
//! by lexicographic order of the candidate string, which makes decoding a
//! pure function of (w, HMM, rules, k) -- repeat calls are bit-identical.
//!
//! Hypothesis scoring (an ambiguity in the published description) is
//! resolved as *best path*: the hypothesis string is aligned against the
//! token with the training aligner, and the aligned pairs are scored with
//! Π/A/B; positions aligned to ε contribute the uniform 1/|Σ| fallback.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::align::{align_with, AlignConfig};
use crate::model::Hmm;
use crate::Result;

/// One ranked correction candidate: a gold-string hypothesis and its
/// log-probability under the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KBestItem {
    /// Candidate gold string.
    pub candidate: String,
    /// Natural-log probability of the candidate emitting the token.
    pub log_prob: f64,
}

impl KBestItem {
    /// The padding entry used when fewer than k distinct candidates exist.
    pub fn padding() -> Self {
        Self {
            candidate: String::new(),
            log_prob: f64::NEG_INFINITY,
        }
    }
}

/// User-supplied multi-character substitution rules: a gold substring
/// mapped to the noisy substrings it may surface as (`m → [im, rn]`,
/// `li → [h]`). Static per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionRules {
    map: BTreeMap<String, Vec<String>>,
}

impl SubstitutionRules {
    /// Empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that gold `gold` may surface as noisy `noisy`.
    ///
    /// Rules with an empty side are malformed: reported and skipped.
    pub fn insert(&mut self, gold: &str, noisy: &str) {
        if gold.is_empty() || noisy.is_empty() {
            warn!(gold, noisy, "skipping substitution rule with empty side");
            return;
        }
        let variants = self.map.entry(gold.to_string()).or_default();
        if !variants.iter().any(|v| v == noisy) {
            variants.push(noisy.to_string());
            variants.sort();
        }
    }

    /// Parse the JSON rule format: an object of gold substrings to arrays
    /// of noisy variants. Malformed entries are skipped with a warning.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        let mut rules = Self::new();
        for (gold, variants) in raw {
            for noisy in variants {
                rules.insert(&gold, &noisy);
            }
        }
        Ok(rules)
    }

    /// True if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Content address: SHA-256 over the canonicalized rule list (sorted
    /// keys, sorted variants).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (gold, variants) in &self.map {
            hasher.update(gold.as_bytes());
            hasher.update([0x1f]);
            for v in variants {
                hasher.update(v.as_bytes());
                hasher.update([0x1e]);
            }
            hasher.update([0x1d]);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    /// All single-occurrence rewrites of `word` under the rules, in both
    /// directions (noisy substring back to gold, and gold substring out to
    /// noisy). Each occurrence is rewritten at most once; no cascading.
    pub fn variants(&self, word: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (gold, variants) in &self.map {
            for noisy in variants {
                rewrite_each(word, noisy, gold, &mut out);
                rewrite_each(word, gold, noisy, &mut out);
            }
        }
        out
    }
}

/// Push every single-occurrence rewrite of `from` to `to` inside `word`.
fn rewrite_each(word: &str, from: &str, to: &str, out: &mut BTreeSet<String>) {
    for (i, _) in word.match_indices(from) {
        let mut w = String::with_capacity(word.len() + to.len());
        w.push_str(&word[..i]);
        w.push_str(to);
        w.push_str(&word[i + from.len()..]);
        if w != word {
            out.insert(w);
        }
    }
}

/// The k-best decoder. Read-only once constructed; share it across worker
/// threads freely.
#[derive(Debug)]
pub struct Decoder {
    hmm: Arc<Hmm>,
    rules: SubstitutionRules,
    k: usize,
    warned_unknown: Mutex<BTreeSet<char>>,
}

/// A partial path ending in some state: its log-probability and the gold
/// prefix it spells. The prefix doubles as the deterministic tie-break key.
#[derive(Debug, Clone)]
struct Slot {
    logp: f64,
    text: String,
}

impl Decoder {
    /// Build a decoder over a shared model.
    pub fn new(hmm: Arc<Hmm>, rules: SubstitutionRules, k: usize) -> Self {
        assert!(k > 0, "k must be at least 1");
        Self {
            hmm,
            rules,
            k,
            warned_unknown: Mutex::new(BTreeSet::new()),
        }
    }

    /// Number of candidates per token.
    pub fn k(&self) -> usize {
        self.k
    }

    /// The model decoded against.
    pub fn hmm(&self) -> &Arc<Hmm> {
        &self.hmm
    }

    /// The substitution rules in force.
    pub fn rules(&self) -> &SubstitutionRules {
        &self.rules
    }

    /// Decode `word` to exactly k candidates, best first.
    ///
    /// Runs the k-best Viterbi pass, merges substitution-rule hypotheses,
    /// and pads with `("", -inf)` when fewer than k distinct candidates
    /// exist. Deterministic: ties sort lexicographically.
    pub fn decode(&self, word: &str) -> Vec<KBestItem> {
        let viterbi = self.kbest_viterbi(word);
        if self.rules.is_empty() || word.is_empty() {
            return viterbi;
        }

        // Merge rewrites; on a collision the better score wins.
        let mut merged: BTreeMap<String, f64> = viterbi
            .into_iter()
            .filter(|item| !item.candidate.is_empty())
            .map(|item| (item.candidate, item.log_prob))
            .collect();
        for hypothesis in self.rules.variants(word) {
            let logp = self.score_hypothesis(&hypothesis, word);
            merged
                .entry(hypothesis)
                .and_modify(|existing| *existing = existing.max(logp))
                .or_insert(logp);
        }

        let mut items: Vec<KBestItem> = merged
            .into_iter()
            .map(|(candidate, log_prob)| KBestItem { candidate, log_prob })
            .collect();
        items.sort_by(compare_items);
        pad(items, self.k)
    }

    /// The 1-to-1 channel pass: k best state paths emitting `word`.
    pub fn kbest_viterbi(&self, word: &str) -> Vec<KBestItem> {
        let obs: Vec<Option<usize>> = word.chars().map(|c| self.observation(c)).collect();
        let s = self.hmm.alphabet().len();
        if obs.is_empty() || s == 0 {
            return pad(Vec::new(), self.k);
        }

        // slots[state] holds up to k partial paths ending in that state,
        // best first. Two rolling time slices replace the full 3-D
        // (time, state, rank) block: the prefix strings carried in the
        // slots subsume the backpointers.
        let mut slots: Vec<Vec<Slot>> = (0..s)
            .map(|st| {
                vec![Slot {
                    logp: self.hmm.log_init(st) + self.hmm.log_emis(st, obs[0]),
                    text: self.hmm.alphabet().char_at(st).to_string(),
                }]
            })
            .collect();

        for &ob in &obs[1..] {
            let mut next: Vec<Vec<Slot>> = Vec::with_capacity(s);
            for st in 0..s {
                let mut cands: Vec<(f64, &Slot)> = Vec::with_capacity(s * self.k);
                for (prev, slot) in slots.iter().enumerate() {
                    let tran = self.hmm.log_tran(prev, st);
                    for path in slot {
                        cands.push((path.logp + tran, path));
                    }
                }
                // Largest log-probability first; equal scores resolve by
                // the prefix string (the appended character is the same
                // for every candidate of this state).
                cands.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.text.cmp(&b.1.text)));

                let ch = self.hmm.alphabet().char_at(st);
                let emit = self.hmm.log_emis(st, ob);
                next.push(
                    cands
                        .into_iter()
                        .take(self.k)
                        .map(|(logp, path)| {
                            let mut text = String::with_capacity(path.text.len() + ch.len_utf8());
                            text.push_str(&path.text);
                            text.push(ch);
                            Slot {
                                logp: logp + emit,
                                text,
                            }
                        })
                        .collect(),
                );
            }
            slots = next;
        }

        let mut finals: Vec<KBestItem> = slots
            .into_iter()
            .flatten()
            .map(|slot| KBestItem {
                candidate: slot.text,
                log_prob: slot.logp,
            })
            .collect();
        finals.sort_by(compare_items);
        pad(finals, self.k)
    }

    /// Best-path score of `hypothesis` emitting `word`.
    ///
    /// The two strings are aligned with the training aligner; each aligned
    /// pair contributes its Π/A and B factors, and ε-aligned positions
    /// (insertions and deletions) contribute the uniform fallback.
    fn score_hypothesis(&self, hypothesis: &str, word: &str) -> f64 {
        if hypothesis.is_empty() {
            return f64::NEG_INFINITY;
        }
        let Ok(alignment) = align_with(hypothesis, word, &AlignConfig::default()) else {
            return f64::NEG_INFINITY;
        };

        let mut prev: Option<usize> = None;
        let mut logp = 0.0;
        for &(g, n) in &alignment.pairs {
            match g {
                Some(gc) => match self.hmm.alphabet().index_of(gc) {
                    Some(st) => {
                        logp += match prev {
                            None => self.hmm.log_init(st),
                            Some(p) => self.hmm.log_tran(p, st),
                        };
                        logp += match n {
                            Some(nc) => self.hmm.log_emis(st, self.observation(nc)),
                            // State aligned to ε: emits nothing observable.
                            None => self.hmm.uniform_log(),
                        };
                        prev = Some(st);
                    }
                    // Hypothesis character outside Σ: uniform for both
                    // factors, chain position unchanged.
                    None => logp += 2.0 * self.hmm.uniform_log(),
                },
                // (ε, n): observed character with no generating state.
                None => logp += self.hmm.uniform_log(),
            }
        }
        logp
    }

    /// Dense index of an observed character, warning once per character
    /// per decoder when it falls outside the model alphabet.
    fn observation(&self, c: char) -> Option<usize> {
        let idx = self.hmm.alphabet().index_of(c);
        if idx.is_none() {
            if let Ok(mut seen) = self.warned_unknown.lock() {
                if seen.insert(c) {
                    warn!(character = ?c, "not in model alphabet; using uniform emission");
                }
            }
        }
        idx
    }
}

fn compare_items(a: &KBestItem, b: &KBestItem) -> Ordering {
    b.log_prob
        .total_cmp(&a.log_prob)
        .then_with(|| a.candidate.cmp(&b.candidate))
}

fn pad(mut items: Vec<KBestItem>, k: usize) -> Vec<KBestItem> {
    items.truncate(k);
    while items.len() < k {
        items.push(KBestItem::padding());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HmmBuilder, MisreadCounts};

    fn tiny_hmm() -> Arc<Hmm> {
        let mut counts = MisreadCounts::default();
        counts.add(Some('a'), Some('a'), 8);
        counts.add(Some('a'), Some('o'), 2);
        counts.add(Some('b'), Some('b'), 10);
        Arc::new(
            HmmBuilder::new()
                .build(&counts, &["ab", "ab", "ba", "abab"])
                .unwrap(),
        )
    }

    #[test]
    fn variants_rewrite_in_both_directions() {
        let mut rules = SubstitutionRules::new();
        rules.insert("rn", "m");
        let out = rules.variants("modem");
        assert!(out.contains("modern"));
        assert!(out.contains("rnodem"));
        assert_eq!(out.len(), 2);

        // Same rule, other orientation of the data.
        let out = rules.variants("modern");
        assert!(out.contains("modem"));
        assert!(out.contains("rnodern"));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn variants_do_not_cascade() {
        let mut rules = SubstitutionRules::new();
        rules.insert("n", "m");
        let out = rules.variants("mm");
        // One occurrence rewritten at a time, never both.
        assert_eq!(
            out,
            BTreeSet::from(["nm".to_string(), "mn".to_string()])
        );
    }

    #[test]
    fn empty_rule_sides_are_skipped() {
        let mut rules = SubstitutionRules::new();
        rules.insert("", "m");
        rules.insert("rn", "");
        assert!(rules.is_empty());
    }

    #[test]
    fn rule_fingerprint_ignores_insertion_order() {
        let mut a = SubstitutionRules::new();
        a.insert("rn", "m");
        a.insert("rn", "nn");
        a.insert("li", "h");
        let mut b = SubstitutionRules::new();
        b.insert("li", "h");
        b.insert("rn", "nn");
        b.insert("rn", "m");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn decode_is_deterministic_and_monotone() {
        let decoder = Decoder::new(tiny_hmm(), SubstitutionRules::new(), 4);
        let first = decoder.decode("ob");
        let second = decoder.decode("ob");
        assert_eq!(first, second);
        for pair in first.windows(2) {
            assert!(pair[0].log_prob >= pair[1].log_prob);
        }
    }

    #[test]
    fn decode_pads_when_paths_run_out() {
        // Two states over a two-character token: four distinct paths.
        let mut counts = MisreadCounts::default();
        counts.add(Some('a'), Some('a'), 5);
        counts.add(Some('b'), Some('b'), 5);
        let hmm = Arc::new(HmmBuilder::new().build(&counts, &["ab", "ba"]).unwrap());
        let decoder = Decoder::new(hmm, SubstitutionRules::new(), 6);
        let kbest = decoder.decode("ab");
        assert_eq!(kbest.len(), 6);
        assert_eq!(kbest[4], KBestItem::padding());
        assert_eq!(kbest[5], KBestItem::padding());
        let distinct: BTreeSet<&str> =
            kbest[..4].iter().map(|i| i.candidate.as_str()).collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn unknown_characters_fall_back_to_uniform() {
        let decoder = Decoder::new(tiny_hmm(), SubstitutionRules::new(), 2);
        let kbest = decoder.decode("a?b");
        // Never fails; still k ranked candidates over the known alphabet.
        assert_eq!(kbest.len(), 2);
        assert!(kbest[0].log_prob > f64::NEG_INFINITY);
        assert!(kbest[0].log_prob >= kbest[1].log_prob);
    }

    #[test]
    fn empty_token_yields_padding_only() {
        let decoder = Decoder::new(tiny_hmm(), SubstitutionRules::new(), 3);
        let kbest = decoder.decode("");
        assert_eq!(kbest, vec![KBestItem::padding(); 3]);
    }

    #[test]
    fn substitution_candidates_join_the_ranking() {
        let mut rules = SubstitutionRules::new();
        rules.insert("b", "o");
        let decoder = Decoder::new(tiny_hmm(), rules, 8);
        let kbest = decoder.decode("ao");
        // The rewrite hypothesis "ab" must appear with a finite score.
        let ab = kbest.iter().find(|i| i.candidate == "ab").unwrap();
        assert!(ab.log_prob > f64::NEG_INFINITY);
    }
}
