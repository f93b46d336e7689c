//! src/normalize.rs
//! Fingerprint treści – kanonizacja tekstu ogłoszenia do porównywalnej postaci.
//!
//! Dwa identyczne ogłoszenia po normalizacji dają identyczny string, a ten
//! string jest zarazem kluczem w rejestrze ostrzeżeń (`ad_key`). Zdjęcia mają
//! własny, nieprzetwarzany fingerprint z platformy – tu nic z nim nie robimy.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Kanoniczna postać tekstu ogłoszenia:
/// NFKC → lowercase → wytnij wszystko poza `\w` i białymi znakami →
/// zbij ciągi białych znaków do pojedynczej spacji → trim.
///
/// Interpunkcję tniemy PRZED zbijaniem spacji – inaczej "a - b" zostawiłoby
/// podwójną spację i funkcja nie byłaby idempotentna.
pub fn normalize(raw: &str) -> String {
    let folded = raw.nfkc().collect::<String>().to_lowercase();
    let stripped = RE_NON_WORD.replace_all(&folded, "");
    let collapsed = RE_WS.replace_all(&stripped, " ");
    collapsed.trim().to_string()
}
