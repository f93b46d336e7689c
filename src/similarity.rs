//! src/similarity.rs
//! Silnik podobieństwa tekstów: TF-IDF na korpusie dwóch dokumentów + cosinus.
//!
//! Zwracamy jawny wynik (`Score`/`NotComputable`) zamiast błędu – zdegenerowany
//! korpus (puste teksty, sama interpunkcja) to normalna sytuacja w skanie
//! kandydatów i caller traktuje ją jak score = 0.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Próg duplikatu – od tej wartości wiadomość liczy się jako naruszenie.
pub const DUPLICATE_THRESHOLD: f64 = 0.75;
/// Dolna granica pasma "podejrzane" – tylko powiadomienie administracji.
pub const REVIEW_THRESHOLD: f64 = 0.35;

// Tokeny: ciągi co najmniej dwóch znaków słownych (pojedyncze litery/cyfry
// nie niosą sygnału i wypadają z wokabularza).
static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

/// Wynik porównania dwóch tekstów.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Similarity {
    /// Cosinus wektorów TF-IDF, zakres [0, 1].
    Score(f64),
    /// Korpus bez wokabularza – porównanie nie ma sensu.
    NotComputable,
}

impl Similarity {
    /// Score albo 0.0 – wygodny odczyt dla pętli skanującej.
    pub fn value(self) -> f64 {
        match self {
            Similarity::Score(s) => s,
            Similarity::NotComputable => 0.0,
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    RE_TOKEN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn term_counts(tokens: &[String]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, f64> = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Podobieństwo cosinusowe TF-IDF dwóch tekstów.
///
/// Model identyczny z referencyjnym wektoryzatorem: surowe liczności termów,
/// wygładzone idf `ln((1+n)/(1+df)) + 1` dla n = 2, normalizacja L2.
/// Koszt O(rozmiar wokabularza pary).
pub fn similarity(a: &str, b: &str) -> Similarity {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);
    if tokens_a.is_empty() && tokens_b.is_empty() {
        return Similarity::NotComputable;
    }

    let counts_a = term_counts(&tokens_a);
    let counts_b = term_counts(&tokens_b);

    // idf po całym wokabularzu pary
    let mut vocab: Vec<&str> = counts_a.keys().chain(counts_b.keys()).copied().collect();
    vocab.sort_unstable();
    vocab.dedup();

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for term in vocab {
        let tf_a = counts_a.get(term).copied().unwrap_or(0.0);
        let tf_b = counts_b.get(term).copied().unwrap_or(0.0);
        let df = (tf_a > 0.0) as u32 + (tf_b > 0.0) as u32;
        let idf = ((1.0 + 2.0) / (1.0 + f64::from(df))).ln() + 1.0;
        let wa = tf_a * idf;
        let wb = tf_b * idf;
        dot += wa * wb;
        norm_a += wa * wa;
        norm_b += wb * wb;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        // jeden z dokumentów nie wniósł żadnego termu
        return Similarity::Score(0.0);
    }

    Similarity::Score(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
