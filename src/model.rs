//! HMM parameter estimation from misread counts and gold text.
//!
//! The model has one hidden state per gold character. Three distributions
//! are estimated:
//!
//! - **Π** (initial): how often each character starts a gold token,
//!   Laplace-smoothed: `Π(c) = (1 + starts(c)) / (|Σ| + tokens)`.
//! - **A** (transition): gold-text bigram frequencies, Laplace-smoothed:
//!   `A(c₁, c₂) = (1 + bigram(c₁c₂)) / (|Σ| + count(c₁))`.
//! - **B** (emission): misread counts with additive (Lidstone) smoothing:
//!   every cell of a row is seeded with λ before observed counts are added,
//!   then the row is normalized. Extension characters with no training data
//!   therefore emit uniformly.
//!
//! Smoothing is not cosmetic: every character in the extended alphabet must
//! carry non-zero initial, transition, and emission mass, or the decoder
//! could zero out a whole candidate over one unseen pairing.
//!
//! Row sums are verified to 1 ± 1e-9 after building *and* after loading
//! serialized parameters; a failed check is fatal.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Alphabet, Error, MisreadCounts, Result};

const ROW_SUM_TOLERANCE: f64 = 1e-9;

/// Estimates an [`Hmm`] from accumulated [`MisreadCounts`] and a gold
/// corpus.
#[derive(Debug, Clone)]
pub struct HmmBuilder {
    lambda: f64,
    extension: BTreeSet<char>,
}

impl Default for HmmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HmmBuilder {
    /// Builder with the default emission smoothing (λ = 1e-6) and no
    /// extension characters.
    pub fn new() -> Self {
        Self {
            lambda: 1e-6,
            extension: BTreeSet::new(),
        }
    }

    /// Override the emission smoothing parameter λ.
    pub fn lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Add characters expected in the corpus but absent from training.
    /// They become states with uniform priors.
    pub fn extension_chars<I: IntoIterator<Item = char>>(mut self, chars: I) -> Self {
        self.extension.extend(chars);
        self
    }

    /// Estimate Π, A, B over the alphabet spanned by `counts`, the gold
    /// corpus, and the extension set.
    ///
    /// # Errors
    ///
    /// [`Error::ModelInconsistent`] if the alphabet comes out empty or a
    /// probability row fails its sum check.
    pub fn build(&self, counts: &MisreadCounts, gold_words: &[&str]) -> Result<Hmm> {
        let mut charset: BTreeSet<char> = self.extension.clone();
        for (g, n, _) in counts.iter() {
            charset.extend(g);
            charset.extend(n);
        }
        for word in gold_words {
            charset.extend(word.chars());
        }
        if charset.is_empty() {
            return Err(Error::ModelInconsistent(
                "no characters in counts, corpus, or extension set".into(),
            ));
        }
        let alphabet = Alphabet::from_chars(charset);
        let s = alphabet.len();

        // Initial and transition tallies from the gold corpus.
        let mut starts = vec![0u64; s];
        let mut bigrams = Array2::<u64>::zeros((s, s));
        let mut total_words = 0u64;
        for word in gold_words {
            let chars: Vec<char> = word.chars().collect();
            let Some(&first) = chars.first() else { continue };
            total_words += 1;
            // Corpus characters are all in the alphabet by construction.
            starts[alphabet.index_of(first).unwrap()] += 1;
            for pair in chars.windows(2) {
                let i = alphabet.index_of(pair[0]).unwrap();
                let j = alphabet.index_of(pair[1]).unwrap();
                bigrams[[i, j]] += 1;
            }
        }

        let init_denom = s as f64 + total_words as f64;
        let init = Array1::from_iter(
            starts
                .iter()
                .map(|&c| (1.0 + c as f64) / init_denom),
        );

        let mut tran = Array2::<f64>::zeros((s, s));
        for i in 0..s {
            let row_total: u64 = (0..s).map(|j| bigrams[[i, j]]).sum();
            let denom = s as f64 + row_total as f64;
            for j in 0..s {
                tran[[i, j]] = (1.0 + bigrams[[i, j]] as f64) / denom;
            }
        }

        // Emissions: seed every cell with λ, add observed misreads
        // (gap-keyed entries belong to the aligner, not to B), normalize.
        let mut emis = Array2::<f64>::zeros((s, s));
        for i in 0..s {
            let g = alphabet.char_at(i);
            let mut row_total = s as f64 * self.lambda;
            for j in 0..s {
                let c = counts.get(Some(g), Some(alphabet.char_at(j))) as f64;
                emis[[i, j]] = self.lambda + c;
                row_total += c;
            }
            for j in 0..s {
                emis[[i, j]] /= row_total;
            }
        }

        Hmm::from_params(alphabet, init, tran, emis)
    }
}

/// Serialized form: three nested mappings with single-character keys.
/// `BTreeMap` keeps key order canonical, which makes the JSON byte-stable
/// and fingerprintable.
#[derive(Serialize, Deserialize)]
struct HmmParams {
    initial: BTreeMap<String, f64>,
    transition: BTreeMap<String, BTreeMap<String, f64>>,
    emission: BTreeMap<String, BTreeMap<String, f64>>,
}

/// A trained character-level error model: states are gold characters,
/// observations are noisy characters.
///
/// Read-only after construction; share it across worker threads freely
/// (e.g. behind an `Arc`).
#[derive(Debug, Clone)]
pub struct Hmm {
    alphabet: Alphabet,
    init: Array1<f64>,
    tran: Array2<f64>,
    emis: Array2<f64>,
    log_init: Array1<f64>,
    log_tran: Array2<f64>,
    log_emis: Array2<f64>,
    uniform_log: f64,
    fingerprint: String,
}

impl Hmm {
    fn from_params(
        alphabet: Alphabet,
        init: Array1<f64>,
        tran: Array2<f64>,
        emis: Array2<f64>,
    ) -> Result<Self> {
        let s = alphabet.len();
        assert_eq!(init.len(), s);
        assert_eq!(tran.dim(), (s, s));
        assert_eq!(emis.dim(), (s, s));

        let log_init = init.mapv(f64::ln);
        let log_tran = tran.mapv(f64::ln);
        let log_emis = emis.mapv(f64::ln);
        let mut hmm = Self {
            alphabet,
            init,
            tran,
            emis,
            log_init,
            log_tran,
            log_emis,
            uniform_log: -(s as f64).ln(),
            fingerprint: String::new(),
        };
        hmm.parameter_check()?;
        debug!(states = s, "HMM parameters check out");

        let canonical = serde_json::to_string(&hmm.params())?;
        hmm.fingerprint = hex_digest(canonical.as_bytes());
        Ok(hmm)
    }

    /// Verify that Π sums to 1 and every row of A and B sums to 1, all
    /// within 1e-9.
    pub fn parameter_check(&self) -> Result<()> {
        let check = |what: String, sum: f64| {
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                Err(Error::ModelInconsistent(format!("{what} sums to {sum}")))
            } else {
                Ok(())
            }
        };
        check("initial distribution".into(), self.init.sum())?;
        for (i, row) in self.tran.rows().into_iter().enumerate() {
            check(
                format!("transition row {:?}", self.alphabet.char_at(i)),
                row.sum(),
            )?;
        }
        for (i, row) in self.emis.rows().into_iter().enumerate() {
            check(
                format!("emission row {:?}", self.alphabet.char_at(i)),
                row.sum(),
            )?;
        }
        Ok(())
    }

    fn params(&self) -> HmmParams {
        let key = |i: usize| self.alphabet.char_at(i).to_string();
        let s = self.alphabet.len();
        let row = |m: &Array2<f64>, i: usize| {
            (0..s).map(|j| (key(j), m[[i, j]])).collect::<BTreeMap<_, _>>()
        };
        HmmParams {
            initial: (0..s).map(|i| (key(i), self.init[i])).collect(),
            transition: (0..s).map(|i| (key(i), row(&self.tran, i))).collect(),
            emission: (0..s).map(|i| (key(i), row(&self.emis, i))).collect(),
        }
    }

    /// Serialize as the canonical JSON triple (initial, transition,
    /// emission) with character keys. Byte-stable: serializing a reloaded
    /// model reproduces the same bytes.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.params())?)
    }

    /// Load a model from its JSON form.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedHmm`] for structural problems (multi-character
    /// keys, mismatched key sets), [`Error::ModelInconsistent`] when a row
    /// fails its sum check -- consistency is fatal at load time.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: HmmParams = serde_json::from_str(json)?;

        let mut chars = Vec::with_capacity(params.initial.len());
        for k in params.initial.keys() {
            let mut it = k.chars();
            match (it.next(), it.next()) {
                (Some(c), None) => chars.push(c),
                _ => return Err(Error::MalformedHmm(format!("key {k:?} is not one character"))),
            }
        }
        let alphabet = Alphabet::from_chars(chars);
        let s = alphabet.len();
        if s != params.initial.len() {
            return Err(Error::MalformedHmm("duplicate initial keys".into()));
        }

        let keyset: BTreeSet<&String> = params.initial.keys().collect();
        for (name, table) in [("transition", &params.transition), ("emission", &params.emission)] {
            if table.keys().collect::<BTreeSet<_>>() != keyset {
                return Err(Error::MalformedHmm(format!(
                    "{name} keys do not match initial keys"
                )));
            }
            for (outer, row) in table {
                if row.keys().collect::<BTreeSet<_>>() != keyset {
                    return Err(Error::MalformedHmm(format!(
                        "{name} row {outer:?} keys do not match initial keys"
                    )));
                }
            }
        }

        let mut init = Array1::<f64>::zeros(s);
        for (k, &v) in &params.initial {
            init[alphabet.index_of(k.chars().next().unwrap()).unwrap()] = v;
        }
        let mut tran = Array2::<f64>::zeros((s, s));
        let mut emis = Array2::<f64>::zeros((s, s));
        for (table, dest) in [(&params.transition, &mut tran), (&params.emission, &mut emis)] {
            for (outer, row) in table.iter() {
                let i = alphabet.index_of(outer.chars().next().unwrap()).unwrap();
                for (inner, &v) in row {
                    let j = alphabet.index_of(inner.chars().next().unwrap()).unwrap();
                    dest[[i, j]] = v;
                }
            }
        }

        Self::from_params(alphabet, init, tran, emis)
    }

    /// Content address of this model: SHA-256 over the canonical JSON.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The model's alphabet Σ.
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// Π(c), if `c` is a state.
    pub fn initial(&self, c: char) -> Option<f64> {
        self.alphabet.index_of(c).map(|i| self.init[i])
    }

    /// A(c₁, c₂), if both are states.
    pub fn transition(&self, c1: char, c2: char) -> Option<f64> {
        match (self.alphabet.index_of(c1), self.alphabet.index_of(c2)) {
            (Some(i), Some(j)) => Some(self.tran[[i, j]]),
            _ => None,
        }
    }

    /// B(g, n), if both are in the alphabet.
    pub fn emission(&self, g: char, n: char) -> Option<f64> {
        match (self.alphabet.index_of(g), self.alphabet.index_of(n)) {
            (Some(i), Some(j)) => Some(self.emis[[i, j]]),
            _ => None,
        }
    }

    /// log Π by state index.
    #[inline]
    pub(crate) fn log_init(&self, s: usize) -> f64 {
        self.log_init[s]
    }

    /// log A by state indices.
    #[inline]
    pub(crate) fn log_tran(&self, prev: usize, next: usize) -> f64 {
        self.log_tran[[prev, next]]
    }

    /// log B by state index and observation; unknown observations emit
    /// uniformly.
    #[inline]
    pub(crate) fn log_emis(&self, state: usize, obs: Option<usize>) -> f64 {
        match obs {
            Some(o) => self.log_emis[[state, o]],
            None => self.uniform_log,
        }
    }

    /// The uniform fallback, log(1/|Σ|).
    #[inline]
    pub(crate) fn uniform_log(&self) -> f64 {
        self.uniform_log
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoke_counts() -> MisreadCounts {
        let mut c = MisreadCounts::default();
        c.add(Some('a'), Some('a'), 3);
        c.add(Some('b'), Some('b'), 1);
        c.add(Some('b'), Some('d'), 1);
        c.add(Some('c'), Some('c'), 1);
        c
    }

    #[test]
    fn smoke_estimates() {
        let hmm = HmmBuilder::new()
            .build(&smoke_counts(), &["ab", "ab", "ac"])
            .unwrap();
        // Alphabet is {a, b, c, d}: d enters from the noisy side.
        let s = hmm.alphabet().len() as f64;
        assert_eq!(hmm.alphabet().chars(), &['a', 'b', 'c', 'd']);

        // Π(a) = (1 + 3) / (|Σ| + 3): all three tokens start with 'a'.
        let pi_a = hmm.initial('a').unwrap();
        assert!((pi_a - 4.0 / (s + 3.0)).abs() < 1e-12);

        // A(a, b) = (1 + 2) / (|Σ| + 3): raw bigram share is 2/3.
        let a_ab = hmm.transition('a', 'b').unwrap();
        assert!((a_ab - 3.0 / (s + 3.0)).abs() < 1e-12);

        // Smoothing leaves the observed misread visible.
        let b_bd = hmm.emission('b', 'd').unwrap();
        assert!(b_bd > 0.0);
        // (b, b) and (b, d) were seen once each, so they tie.
        assert!((hmm.emission('b', 'b').unwrap() - b_bd).abs() < 1e-15);
        // Unseen emission is smoothing-only, far below an observed one.
        assert!(hmm.emission('a', 'd').unwrap() < hmm.emission('a', 'a').unwrap());
    }

    #[test]
    fn rows_sum_to_one() {
        let hmm = HmmBuilder::new()
            .extension_chars(['ø', 'æ'])
            .build(&smoke_counts(), &["ab", "ab", "ac"])
            .unwrap();
        hmm.parameter_check().unwrap();
    }

    #[test]
    fn extension_characters_emit_uniformly() {
        let hmm = HmmBuilder::new()
            .extension_chars(['ø'])
            .build(&smoke_counts(), &["ab", "ab", "ac"])
            .unwrap();
        let s = hmm.alphabet().len() as f64;
        for &n in hmm.alphabet().chars() {
            let p = hmm.emission('ø', n).unwrap();
            assert!((p - 1.0 / s).abs() < 1e-12, "B(ø, {n:?}) = {p}");
        }
        // And it still has initial/transition support.
        assert!(hmm.initial('ø').unwrap() > 0.0);
        assert!(hmm.transition('ø', 'a').unwrap() > 0.0);
    }

    #[test]
    fn json_round_trip_is_byte_stable() {
        let hmm = HmmBuilder::new()
            .build(&smoke_counts(), &["ab", "ab", "ac"])
            .unwrap();
        let json = hmm.to_json().unwrap();
        let reloaded = Hmm::from_json(&json).unwrap();
        assert_eq!(reloaded.to_json().unwrap(), json);
        assert_eq!(reloaded.fingerprint(), hmm.fingerprint());
        assert_eq!(reloaded.initial('a'), hmm.initial('a'));
        assert_eq!(reloaded.emission('b', 'd'), hmm.emission('b', 'd'));
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        let err = Hmm::from_json(
            r#"{"initial":{"ab":1.0},"transition":{"ab":{"ab":1.0}},"emission":{"ab":{"ab":1.0}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedHmm(_)));

        // Rows that fail the sum check are fatal at load.
        let err = Hmm::from_json(
            r#"{"initial":{"a":0.5},"transition":{"a":{"a":1.0}},"emission":{"a":{"a":1.0}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ModelInconsistent(_)));
    }

    #[test]
    fn empty_training_is_an_error() {
        let err = HmmBuilder::new().build(&MisreadCounts::default(), &[]).unwrap_err();
        assert!(matches!(err, Error::ModelInconsistent(_)));
    }
}
