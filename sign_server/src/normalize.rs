//! Label normalization.
//!
//! Classifier label tables and deployment configs spell the same sign in different ways
//! ("Buenos Días", "buenos dias", "BUENOS  DIAS"). All of them collapse onto one
//! [`NormalizedLabel`] key, and [`LabelBook`] maps each key back to a display form.
use std::{collections::HashMap, fmt};

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Case- and diacritic-insensitive label key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NormalizedLabel(String);

impl NormalizedLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a raw label.
///
/// Case-folds, decomposes to NFD, drops combining marks and collapses runs of whitespace.
/// Total and idempotent.
pub fn normalize(raw: &str) -> NormalizedLabel {
    let folded: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .flat_map(fold_case)
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let mut key = String::with_capacity(folded.len());
    for word in folded.split_whitespace() {
        if !key.is_empty() {
            key.push(' ');
        }
        key.push_str(word);
    }

    NormalizedLabel(key)
}

/// Full case folding on top of lowercasing. Only `ß` (and `ẞ`, already lowercased) expands.
fn fold_case(c: char) -> impl Iterator<Item = char> {
    let (first, second) = match c {
        'ß' => ('s', Some('s')),
        c => (c, None),
    };
    std::iter::once(first).chain(second)
}

/// Lookup from normalized key back to a human readable label.
///
/// Built once at startup and shared read-only between requests.
#[derive(Clone, Debug, Default)]
pub struct LabelBook {
    display: HashMap<NormalizedLabel, String>,
}

impl LabelBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw label. The first registered spelling of a key becomes its display form.
    pub fn register(&mut self, raw: &str) -> NormalizedLabel {
        let key = normalize(raw);
        self.display
            .entry(key.clone())
            .or_insert_with(|| raw.trim().to_owned());
        key
    }

    /// Register an explicit display form, replacing whatever was registered before.
    pub fn set_display(&mut self, display: &str) -> NormalizedLabel {
        let key = normalize(display);
        self.display.insert(key.clone(), display.trim().to_owned());
        key
    }

    /// Registered display form of `key`.
    pub fn get(&self, key: &NormalizedLabel) -> Option<&str> {
        self.display.get(key).map(String::as_str)
    }

    /// Display form of `key`, falling back to the key itself for never registered labels.
    pub fn display<'a>(&'a self, key: &'a NormalizedLabel) -> &'a str {
        self.get(key).unwrap_or_else(|| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.display.len()
    }

    pub fn is_empty(&self) -> bool {
        self.display.is_empty()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_diacritics_and_case_collapse() {
        assert_eq!(normalize("Buenos Días"), normalize("buenos dias"));
        assert_eq!(normalize("ADIÓS"), normalize("adios"));
        assert_eq!(normalize("Buenos Días").as_str(), "buenos dias");
    }

    #[test]
    fn test_sharp_s_folds_to_ss() {
        assert_eq!(normalize("STRASSE"), normalize("straße"));
        assert_eq!(normalize("STRAẞE"), normalize("strasse"));
        assert_eq!(normalize("Straße").as_str(), "strasse");
    }

    #[test]
    fn test_whitespace_collapses() {
        assert_eq!(normalize("  Buenas \t Noches "), normalize("buenas noches"));
    }

    #[test]
    fn test_idempotent() {
        for raw in ["Buenos Días", "ÅNGSTRÖM", "İstanbul", "  Hola  ", "", "ñandú", "Grüße"] {
            let once = normalize(raw);
            assert_eq!(normalize(once.as_str()), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_first_registration_wins() {
        let mut book = LabelBook::new();
        let key = book.register("Buenos Días");
        book.register("buenos dias");

        assert_eq!(book.len(), 1);
        assert_eq!(book.display(&key), "Buenos Días");
    }

    #[test]
    fn test_explicit_display_overrides() {
        let mut book = LabelBook::new();
        let key = book.register("adios");
        book.set_display("Adiós");

        assert_eq!(book.display(&key), "Adiós");
    }

    #[test]
    fn test_unknown_key_displays_itself() {
        let book = LabelBook::new();
        let key = normalize("Gracias");

        assert_eq!(book.display(&key), "gracias");
    }
}
