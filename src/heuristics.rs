//! Heuristic binning of decoded tokens and the per-bin correction policy.
//!
//! Four cheap predicates route every token to one of nine bins:
//!
//! - P1: the top candidate equals the original
//! - P2: the original is in the dictionary
//! - P3: the top candidate is in the dictionary
//! - P4: some lower-ranked candidate is in the dictionary
//!
//! | Bin | P1 | P2 | P3 | P4 |
//! |-----|----|----|----|----|
//! | 1 | T | T | T | – |
//! | 2 | T | F | F | F |
//! | 3 | T | F | F | T |
//! | 4 | F | F | T | – |
//! | 5 | F | F | F | F |
//! | 6 | F | F | F | T |
//! | 7 | F | T | T | – |
//! | 8 | F | T | F | F |
//! | 9 | F | T | F | T |
//!
//! P1 forces P2 ⇔ P3 (the top candidate *is* the original), so the table is
//! total over every reachable combination. Each bin maps to an action:
//! accept the original, accept the top candidate, accept the best
//! in-dictionary candidate, or defer to a human annotator. Dictionary
//! probes strip surrounding punctuation first, so `"(the)"` tests as
//! `"the"`.

use crate::decode::KBestItem;
use crate::dictionary::{strip_punctuation, Dictionary};
use crate::{Error, Result};

/// What to do with the tokens of a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep the original token text.
    Original,
    /// Take the top-ranked candidate.
    KBest,
    /// Take the best-ranked candidate that passes the dictionary; falls
    /// back to [`Action::Annotator`] when none does.
    KDict,
    /// Defer to a human annotator.
    Annotator,
}

impl Action {
    /// Parse the single-letter code used in settings files.
    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'o' => Ok(Self::Original),
            'k' => Ok(Self::KBest),
            'd' => Ok(Self::KDict),
            'a' => Ok(Self::Annotator),
            other => Err(Error::UnknownAction(other)),
        }
    }

    /// The single-letter code for settings files.
    pub fn code(self) -> char {
        match self {
            Self::Original => 'o',
            Self::KBest => 'k',
            Self::KDict => 'd',
            Self::Annotator => 'a',
        }
    }
}

/// The configured bin → action map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    actions: [Action; 9],
}

impl Default for Policy {
    /// Everything goes to the annotator until configured otherwise.
    fn default() -> Self {
        Self {
            actions: [Action::Annotator; 9],
        }
    }
}

impl Policy {
    /// A policy from explicit actions for bins 1..=9.
    pub fn new(actions: [Action; 9]) -> Self {
        Self { actions }
    }

    /// The action for `bin`.
    ///
    /// # Panics
    ///
    /// Panics if `bin` is outside 1..=9.
    pub fn action(&self, bin: u8) -> Action {
        assert!((1..=9).contains(&bin), "bin {bin} out of range");
        self.actions[bin as usize - 1]
    }

    /// Reassign one bin.
    ///
    /// # Panics
    ///
    /// Panics if `bin` is outside 1..=9.
    pub fn set(&mut self, bin: u8, action: Action) {
        assert!((1..=9).contains(&bin), "bin {bin} out of range");
        self.actions[bin as usize - 1] = action;
    }

    /// Parse the stable settings format: one `bin_id<TAB>action` per line.
    /// Bins not mentioned stay on [`Action::Annotator`].
    pub fn from_tsv(text: &str) -> Result<Self> {
        let mut policy = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: &str| Error::MalformedRecord {
                line: lineno + 1,
                reason: reason.to_string(),
            };
            let (bin, code) = line
                .split_once('\t')
                .ok_or_else(|| malformed("expected bin_id<TAB>action"))?;
            let bin: u8 = bin
                .trim()
                .parse()
                .map_err(|_| malformed("bin id is not a number"))?;
            if !(1..=9).contains(&bin) {
                return Err(malformed("bin id out of range 1..=9"));
            }
            let code = code.trim();
            let mut chars = code.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => policy.set(bin, Action::from_code(c)?),
                _ => return Err(malformed("action is not a single letter")),
            }
        }
        Ok(policy)
    }

    /// Serialize to the settings format.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        for (i, action) in self.actions.iter().enumerate() {
            out.push_str(&format!("{}\t{}\n", i + 1, action.code()));
        }
        out
    }
}

/// Where a resolved correction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The original token was kept.
    Original,
    /// Candidate at this rank (0-based) was taken.
    Candidate(usize),
    /// Dictionary-passing candidate at this rank (0-based) was taken.
    DictionaryPick(usize),
    /// A human annotator supplied the text.
    Annotator,
    /// A memorised correction matched the original.
    Memo,
}

/// A finalized correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    /// The final text of the token.
    pub text: String,
    /// How it was chosen.
    pub source: Source,
}

/// The outcome of evaluating one token: either resolved, or handed to an
/// annotator with everything they need to decide.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Resolved without human help.
    Accept(Correction),
    /// Needs an annotator.
    NeedsAnnotation {
        /// The original token text.
        original: String,
        /// Its ranked candidates.
        kbest: Vec<KBestItem>,
        /// The bin that routed it here.
        bin: u8,
    },
}

fn in_dict(dict: &Dictionary, word: &str) -> bool {
    dict.contains(&strip_punctuation(word))
}

/// Assign the bin for `original` with candidates `kbest` against `dict`.
///
/// Total: every input lands in exactly one bin in 1..=9. Padding
/// candidates (empty strings) never test as dictionary members.
pub fn assign_bin(original: &str, kbest: &[KBestItem], dict: &Dictionary) -> u8 {
    let top = kbest.first().map(|item| item.candidate.as_str()).unwrap_or("");
    let p1 = top == original;
    let p2 = in_dict(dict, original);
    let p3 = in_dict(dict, top);
    let p4 = kbest
        .iter()
        .skip(1)
        .any(|item| in_dict(dict, &item.candidate));

    match (p1, p2, p3, p4) {
        (true, true, _, _) => 1,
        (true, false, _, false) => 2,
        (true, false, _, true) => 3,
        (false, false, true, _) => 4,
        (false, false, false, false) => 5,
        (false, false, false, true) => 6,
        (false, true, true, _) => 7,
        (false, true, false, false) => 8,
        (false, true, false, true) => 9,
    }
}

/// Applies the policy to binned tokens.
#[derive(Debug, Clone, Default)]
pub struct Heuristics {
    policy: Policy,
}

impl Heuristics {
    /// A heuristics engine with the given policy.
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    /// The policy in force.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Bin the token and apply the bin's action.
    ///
    /// `KDict` with no dictionary-passing candidate degrades to the
    /// annotator; that is the documented contract, not an error.
    pub fn evaluate(
        &self,
        original: &str,
        kbest: &[KBestItem],
        dict: &Dictionary,
    ) -> (u8, Verdict) {
        let bin = assign_bin(original, kbest, dict);
        let defer = || Verdict::NeedsAnnotation {
            original: original.to_string(),
            kbest: kbest.to_vec(),
            bin,
        };

        let verdict = match self.policy.action(bin) {
            Action::Original => Verdict::Accept(Correction {
                text: original.to_string(),
                source: Source::Original,
            }),
            Action::KBest => match kbest.first() {
                Some(top) if !top.candidate.is_empty() => Verdict::Accept(Correction {
                    text: top.candidate.clone(),
                    source: Source::Candidate(0),
                }),
                _ => defer(),
            },
            Action::KDict => match kbest
                .iter()
                .enumerate()
                .find(|(_, item)| in_dict(dict, &item.candidate))
            {
                Some((rank, item)) => Verdict::Accept(Correction {
                    text: item.candidate.clone(),
                    source: Source::DictionaryPick(rank),
                }),
                None => defer(),
            },
            Action::Annotator => defer(),
        };
        (bin, verdict)
    }
}
