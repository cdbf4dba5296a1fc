//! Correct a page of noisy OCR text end to end.
//!
//! Trains a small model, sets up a per-bin policy and dictionary, runs the
//! pipeline over a tokenized page, and prints the decisions, the bin
//! report, and the corrected text.

use std::sync::Arc;

use emend::correct::corrected_text;
use emend::token::tokenize;
use emend::{
    align, Action, Corrector, CorrectorConfig, Dictionary, HmmBuilder, MisreadCounts, Policy,
    SubstitutionRules, Verdict,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // 1. Train from a parallel corpus.
    let corpus = [
        ("the old printing house", "tbe old printing h0use"),
        ("the quick brown fox", "the qu1ck brown fox"),
        ("a modern morning", "a modem morning"),
        ("the house of the printer", "tbe house of tbe printer"),
    ];
    let mut counts = MisreadCounts::default();
    for (gold, noisy) in corpus {
        counts.record(&align(gold, noisy)?);
    }
    let gold_words: Vec<&str> = corpus
        .iter()
        .flat_map(|(gold, _)| gold.split_whitespace())
        .collect();
    let hmm = Arc::new(HmmBuilder::new().build(&counts, &gold_words)?);

    // 2. Resources: dictionary, substitution rules, per-bin policy.
    let mut dictionary = Dictionary::new(false);
    for w in [
        "the", "old", "printing", "house", "quick", "brown", "fox", "a", "modern", "morning",
        "of", "printer",
    ] {
        dictionary.add(w);
    }

    let mut rules = SubstitutionRules::new();
    rules.insert("rn", "m"); // modern -> modem

    let mut policy = Policy::default();
    policy.set(1, Action::Original); // trusted: keep as is
    policy.set(2, Action::Original);
    policy.set(3, Action::KDict); // a lower-ranked candidate is a word
    policy.set(4, Action::KBest); // decoder found a word, original is not one
    policy.set(6, Action::KDict);

    let mut corrector = Corrector::new(
        hmm,
        dictionary,
        CorrectorConfig {
            policy,
            rules,
            ..CorrectorConfig::default()
        },
    );

    // 3. Correct a fresh page.
    let page = "tbe old h0use of tbe print-\ning modem fox .";
    println!("Noisy page:\n  {page}\n");

    let mut tokens = tokenize("demo-page", page);
    let stats = corrector.correct_tokens(&mut tokens);

    println!("Per-token decisions:");
    for token in &tokens {
        match (&token.verdict, token.bin) {
            (Some(Verdict::Accept(correction)), bin) => println!(
                "  {:>12} -> {:<12} (bin {:?}, {:?})",
                token.original, correction.text, bin, correction.source
            ),
            (Some(Verdict::NeedsAnnotation { bin, .. }), _) => {
                println!("  {:>12} -> [annotator] (bin {bin})", token.original)
            }
            (None, _) => println!("  {:>12} -> [pass-through]", token.original),
        }
    }

    println!("\n{}", stats.report());
    println!("Corrected text:\n  {}", corrected_text(&tokens).replace('\n', "\n  "));

    Ok(())
}
