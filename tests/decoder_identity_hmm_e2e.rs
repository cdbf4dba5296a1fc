use std::sync::Arc;

use emend::{Decoder, Hmm, KBestItem, SubstitutionRules};

/// A hand-built two-state model: state `a` always starts and always
/// transitions to itself; it emits `a` with 0.9 and `b` with 0.1. State `b`
/// is unreachable (zero initial and incoming mass) and only exists so the
/// observation `b` has a column.
fn identity_hmm() -> Arc<Hmm> {
    let json = r#"{
        "initial": {"a": 1.0, "b": 0.0},
        "transition": {"a": {"a": 1.0, "b": 0.0}, "b": {"a": 1.0, "b": 0.0}},
        "emission": {"a": {"a": 0.9, "b": 0.1}, "b": {"a": 0.5, "b": 0.5}}
    }"#;
    Arc::new(Hmm::from_json(json).unwrap())
}

#[test]
fn best_path_probability_is_exact() {
    let decoder = Decoder::new(identity_hmm(), SubstitutionRules::new(), 2);
    let kbest = decoder.decode("aaab");

    assert_eq!(kbest.len(), 2);
    assert_eq!(kbest[0].candidate, "aaaa");
    let expected = 3.0 * 0.9_f64.ln() + 0.1_f64.ln();
    assert!(
        (kbest[0].log_prob - expected).abs() < 1e-12,
        "got {}, expected {expected}",
        kbest[0].log_prob
    );

    // Every other path runs through the unreachable state: -inf, and the
    // lexicographic tie-break makes the runner-up deterministic.
    assert_eq!(kbest[1].log_prob, f64::NEG_INFINITY);
    assert_eq!(kbest[1].candidate, "aaab");
}

#[test]
fn repeat_decoding_is_bit_identical() {
    let decoder = Decoder::new(identity_hmm(), SubstitutionRules::new(), 4);
    let first = decoder.decode("aabab");
    for _ in 0..5 {
        assert_eq!(decoder.decode("aabab"), first);
    }
}

#[test]
fn ranking_is_monotone_nonincreasing() {
    let decoder = Decoder::new(identity_hmm(), SubstitutionRules::new(), 4);
    for word in ["a", "ab", "aaab", "bbbb"] {
        let kbest = decoder.decode(word);
        for pair in kbest.windows(2) {
            assert!(
                pair[0].log_prob >= pair[1].log_prob,
                "ranking not monotone for {word:?}"
            );
        }
    }
}

#[test]
fn unknown_observation_uses_uniform_emission() {
    let decoder = Decoder::new(identity_hmm(), SubstitutionRules::new(), 1);
    // 'z' is outside the alphabet: the decoder must not fail, and the top
    // path stays in the reachable state.
    let kbest = decoder.decode("aza");
    assert_eq!(kbest[0].candidate, "aaa");
    // Π(a)·B(a,a) · A(a,a)·(1/|Σ|) · A(a,a)·B(a,a)
    let expected = 2.0 * 0.9_f64.ln() + (1.0_f64 / 2.0).ln();
    assert!((kbest[0].log_prob - expected).abs() < 1e-12);
}

#[test]
fn k_beyond_distinct_paths_pads_with_empty() {
    let decoder = Decoder::new(identity_hmm(), SubstitutionRules::new(), 8);
    let kbest = decoder.decode("ab");
    assert_eq!(kbest.len(), 8);
    // Four distinct paths exist over two states and two positions.
    assert!(kbest[..4].iter().all(|item| !item.candidate.is_empty()));
    assert_eq!(kbest[4], KBestItem::padding());
    assert_eq!(kbest[7], KBestItem::padding());
}

#[test]
fn single_character_token_ranks_states_by_initial_emission() {
    let decoder = Decoder::new(identity_hmm(), SubstitutionRules::new(), 2);
    let kbest = decoder.decode("b");
    assert_eq!(kbest[0].candidate, "a");
    assert!((kbest[0].log_prob - 0.1_f64.ln()).abs() < 1e-12);
    assert_eq!(kbest[1].candidate, "b");
    assert_eq!(kbest[1].log_prob, f64::NEG_INFINITY);
}
