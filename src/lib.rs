//! # emend
//!
//! Post-correction of noisy OCR output: learn how a specific OCR engine
//! misreads characters, then propose ranked corrections for new text.
//!
//! ## The Problem
//!
//! OCR on historical print produces systematic character-level errors
//! (`rn` read as `m`, `h` read as `li`, long-s read as `f`). Given a small
//! parallel corpus of OCR output and hand-corrected "gold" text, we can
//! estimate *which* confusions this engine makes and *how often* -- and then
//! invert the process: for a new noisy token, search for the gold strings
//! most likely to have produced it.
//!
//! ## Key Pieces
//!
//! | Piece | Use Case | Complexity |
//! |-------|----------|------------|
//! | [`align`](align()) | Pair up gold/noisy characters | O(\|G\|·\|N\|) |
//! | [`HmmBuilder`] | Estimate Π, A, B from counts | O(\|Σ\|²) |
//! | [`Decoder`] | k-best candidate strings per token | O(L·\|Σ\|²·k) |
//! | [`Heuristics`] | Route each token to a policy action | O(k) |
//!
//! ## Quick Start
//!
//! ```rust
//! # fn main() -> emend::Result<()> {
//! use emend::{align, Decoder, HmmBuilder, MisreadCounts, SubstitutionRules};
//!
//! // Tally character confusions from a (tiny) parallel corpus.
//! let mut counts = MisreadCounts::default();
//! for (gold, noisy) in [("said", "said"), ("some", "sorne"), ("made", "made")] {
//!     counts.record(&align(gold, noisy)?);
//! }
//!
//! // Estimate the error model and decode a fresh noisy token.
//! let hmm = HmmBuilder::new().build(&counts, &["said", "some", "made"])?;
//! let decoder = Decoder::new(hmm.into(), SubstitutionRules::default(), 3);
//! let kbest = decoder.decode("sorne");
//!
//! assert_eq!(kbest.len(), 3);
//! assert!(kbest[0].log_prob >= kbest[1].log_prob);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline Shape
//!
//! Training: noisy+gold → [`align`](align()) → [`MisreadCounts`] →
//! [`HmmBuilder`] → [`Hmm`]. Inference: token → [`Decoder`] → k-best →
//! [`Heuristics`] → accept / defer to an annotator. The [`Corrector`]
//! wires the inference side together over a token stream, fanning decoding
//! out across a thread pool and memoizing annotator answers.
//!
//! ## What Can Go Wrong
//!
//! 1. **Tiny training data**: the smoothing floor dominates and every
//!    candidate looks equally (im)probable. More parallel text beats
//!    tuning λ.
//! 2. **Alphabet drift**: characters absent from training decode through a
//!    uniform fallback. Pass them as extension characters instead.
//! 3. **Degenerate rules**: substitution rules with empty strings are
//!    skipped (and logged), never applied.
//! 4. **Oversized documents**: whole-document alignment beyond the cell
//!    budget needs an exact-match anchor to split on; without one it is
//!    rejected rather than silently approximated.
//!
//! ## References
//!
//! - Needleman & Wunsch (1970). "A general method applicable to the search
//!   for similarities in the amino acid sequence of two proteins"
//! - Forney (1973). "The Viterbi algorithm"
//! - Jurafsky & Martin, "Speech and Language Processing", App. A (HMMs)

use std::collections::HashMap;

use thiserror::Error;

pub mod align;
pub mod cache;
pub mod correct;
pub mod decode;
pub mod dictionary;
pub mod heuristics;
pub mod model;
pub mod token;

pub use align::{align, align_with, AlignConfig, AlignedPair, Alignment, MisreadCounts};
pub use cache::{cache_key, DecodingCache};
pub use correct::{Corrector, CorrectorConfig, RunStats};
pub use decode::{Decoder, KBestItem, SubstitutionRules};
pub use dictionary::Dictionary;
pub use heuristics::{assign_bin, Action, Correction, Heuristics, Policy, Source, Verdict};
pub use model::{Hmm, HmmBuilder};
pub use token::{Token, TokenKind};

/// Error variants for OCR post-correction.
#[derive(Debug, Error)]
pub enum Error {
    /// Alignment DP table would exceed the cell budget and no anchor was
    /// found to split on.
    #[error("alignment of {cells} cells exceeds budget of {budget} and no anchor found")]
    AlignmentTooLarge {
        /// Requested table size, |G|·|N|.
        cells: u64,
        /// Configured cell budget.
        budget: u64,
    },

    /// A probability row failed its consistency check at build or load time.
    #[error("model inconsistency: {0}")]
    ModelInconsistent(String),

    /// Serialized HMM parameters that cannot describe a valid model.
    #[error("malformed HMM parameters: {0}")]
    MalformedHmm(String),

    /// An unparseable line in a tab-separated resource file.
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord {
        /// 1-indexed line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A per-bin action code outside {o, k, d, a}.
    #[error("unknown heuristic action: {0:?}")]
    UnknownAction(char),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// I/O failure while reading or writing a resource.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for OCR post-correction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A dense character index: the model's alphabet Σ in sorted order, with a
/// reverse lookup table.
///
/// States and observations are indexed by `usize` internally; this side
/// table is the only place characters and indices meet, which keeps the
/// serialization layer (char-keyed) and the numeric core (index-keyed)
/// honest with each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl Alphabet {
    /// Build an alphabet from any character source. Duplicates collapse;
    /// order is the sorted order of the distinct characters.
    pub fn from_chars<I: IntoIterator<Item = char>>(chars: I) -> Self {
        let set: std::collections::BTreeSet<char> = chars.into_iter().collect();
        let chars: Vec<char> = set.into_iter().collect();
        let index = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { chars, index }
    }

    /// Number of characters.
    #[inline]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// True if the alphabet is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Dense index of `c`, or `None` for characters outside the alphabet.
    #[inline]
    pub fn index_of(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    /// Character at dense index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= len()`.
    #[inline]
    pub fn char_at(&self, i: usize) -> char {
        self.chars[i]
    }

    /// All characters in index order.
    #[inline]
    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}
