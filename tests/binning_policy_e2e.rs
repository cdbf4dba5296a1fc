use emend::{assign_bin, Action, Correction, Dictionary, Heuristics, KBestItem, Policy, Source, Verdict};

fn kb(entries: &[(&str, f64)]) -> Vec<KBestItem> {
    entries
        .iter()
        .map(|&(c, p)| KBestItem {
            candidate: c.to_string(),
            log_prob: p,
        })
        .collect()
}

fn dict(words: &[&str]) -> Dictionary {
    let mut d = Dictionary::new(true);
    for w in words {
        d.add(w);
    }
    d
}

#[test]
fn confident_token_lands_in_bin_one_and_keeps_original() {
    let d = dict(&["the", "thc"]);
    let kbest = kb(&[("the", -0.1), ("thc", -3.0), ("", f64::NEG_INFINITY)]);

    assert_eq!(assign_bin("the", &kbest, &d), 1);

    let mut policy = Policy::default();
    policy.set(1, Action::Original);
    let h = Heuristics::new(policy);
    let (bin, verdict) = h.evaluate("the", &kbest, &d);
    assert_eq!(bin, 1);
    assert_eq!(
        verdict,
        Verdict::Accept(Correction {
            text: "the".into(),
            source: Source::Original,
        })
    );
}

#[test]
fn lower_candidate_in_dictionary_resolves_through_kdict() {
    // "Wagor" tops its own list; only the third candidate is a word.
    let d = dict(&["Wagon"]);
    let kbest = kb(&[("Wagor", -0.2), ("Vagor", -1.1), ("Wagon", -1.4)]);

    // P1 = T, P2 = F, P3 = F, P4 = T.
    assert_eq!(assign_bin("Wagor", &kbest, &d), 3);

    let mut policy = Policy::default();
    policy.set(3, Action::KDict);
    let h = Heuristics::new(policy);
    let (_, verdict) = h.evaluate("Wagor", &kbest, &d);
    assert_eq!(
        verdict,
        Verdict::Accept(Correction {
            text: "Wagon".into(),
            source: Source::DictionaryPick(2),
        })
    );
}

#[test]
fn the_table_is_total_over_reachable_predicates() {
    // Sweep every reachable (P1, P2, P3, P4) combination and check each
    // lands in its own bin exactly once.
    let d = dict(&["indict", "lower"]);
    let arrangements: Vec<(&str, Vec<KBestItem>, u8)> = vec![
        ("indict", kb(&[("indict", -0.1), ("zzz", -1.0)]), 1),
        ("zzz", kb(&[("zzz", -0.1), ("yyy", -1.0)]), 2),
        ("zzz", kb(&[("zzz", -0.1), ("lower", -1.0)]), 3),
        ("zzy", kb(&[("indict", -0.1), ("yyy", -1.0)]), 4),
        ("zzz", kb(&[("yyy", -0.1), ("xxx", -1.0)]), 5),
        ("zzz", kb(&[("yyy", -0.1), ("lower", -1.0)]), 6),
        ("indict", kb(&[("lower", -0.1), ("yyy", -1.0)]), 7),
        ("indict", kb(&[("yyy", -0.1), ("xxx", -1.0)]), 8),
        ("indict", kb(&[("yyy", -0.1), ("lower", -1.0)]), 9),
    ];
    let mut seen = std::collections::BTreeSet::new();
    for (original, kbest, expected) in arrangements {
        let bin = assign_bin(original, &kbest, &d);
        assert_eq!(bin, expected, "for original {original:?}");
        assert!((1..=9).contains(&bin));
        seen.insert(bin);
    }
    assert_eq!(seen.len(), 9);
}

#[test]
fn p1_implies_dictionary_agreement_between_original_and_top() {
    // When the top candidate equals the original, P2 and P3 cannot differ,
    // so bins 4..=9 are unreachable.
    let d = dict(&["word"]);
    for (original, kbest) in [
        ("word", kb(&[("word", -0.1)])),
        ("zzz", kb(&[("zzz", -0.1)])),
    ] {
        let bin = assign_bin(original, &kbest, &d);
        assert!((1..=3).contains(&bin), "bin {bin} reached with P1 = T");
    }
}

#[test]
fn policy_settings_file_round_trips() {
    let text = "1\to\n2\to\n3\td\n4\tk\n5\ta\n6\td\n7\to\n8\ta\n9\ta\n";
    let policy = Policy::from_tsv(text).unwrap();
    assert_eq!(policy.action(1), Action::Original);
    assert_eq!(policy.action(3), Action::KDict);
    assert_eq!(policy.action(4), Action::KBest);
    assert_eq!(policy.action(5), Action::Annotator);
    assert_eq!(policy.to_tsv(), text);
}

#[test]
fn kdict_fallback_defers_to_the_annotator() {
    let d = dict(&["unrelated"]);
    let mut policy = Policy::default();
    policy.set(5, Action::KDict);
    let h = Heuristics::new(policy);
    let kbest = kb(&[("yyy", -0.5), ("xxx", -0.9)]);
    let (bin, verdict) = h.evaluate("zzz", &kbest, &d);
    assert_eq!(bin, 5);
    match verdict {
        Verdict::NeedsAnnotation { original, kbest, bin } => {
            assert_eq!(original, "zzz");
            assert_eq!(kbest.len(), 2);
            assert_eq!(bin, 5);
        }
        other => panic!("expected annotation request, got {other:?}"),
    }
}
