//! Train a character error model from a tiny in-memory parallel corpus.
//!
//! Walks the full training path: align noisy/gold document pairs, tally
//! misread counts, estimate the HMM, verify it, and print the serialized
//! parameters and fingerprint.

use emend::{align, HmmBuilder, MisreadCounts};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Gold transcriptions next to the OCR output for the same lines.
    let corpus = [
        ("the printing of this book", "tbe printing of tbis book"),
        ("was finished by hand", "was finisbed by band"),
        ("in the modern manner", "in the modem manner"),
        ("the house of the printer", "tne h0use of the printer"),
    ];

    let mut counts = MisreadCounts::default();
    for (gold, noisy) in corpus {
        let alignment = align(gold, noisy)?;
        println!("aligned {:>28} | {}", gold, noisy);
        counts.record(&alignment);
    }

    println!("\nObserved misreads (gold -> noisy):");
    for (g, n, count) in counts.iter() {
        if g != n {
            let show = |c: Option<char>| c.map(String::from).unwrap_or_else(|| "ε".into());
            println!("  {:>3} -> {:<3} x{count}", show(g), show(n));
        }
    }

    let gold_words: Vec<&str> = corpus
        .iter()
        .flat_map(|(gold, _)| gold.split_whitespace())
        .collect();
    let hmm = HmmBuilder::new()
        .lambda(1e-6)
        .extension_chars(['æ', 'ø', 'å'])
        .build(&counts, &gold_words)?;
    hmm.parameter_check()?;

    println!("\nAlphabet ({} states): {:?}", hmm.alphabet().len(), hmm.alphabet().chars());
    println!("Fingerprint: {}", hmm.fingerprint());

    let json = hmm.to_json()?;
    println!("Serialized parameters: {} bytes", json.len());

    Ok(())
}
