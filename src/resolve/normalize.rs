//! Text normalization for column names and cell values.
//!
//! Spreadsheet exports carry a surprising amount of invisible debris: a UTF-8
//! BOM on the first header, zero-width spaces pasted in from chat apps, soft
//! hyphens. None of it is meaningful, so it is stripped before any comparison.

/// Characters that render as nothing and are removed everywhere.
const INVISIBLE: &[char] = &[
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // BOM / zero width no-break space
    '\u{00AD}', // soft hyphen
];

fn is_invisible(c: char) -> bool {
    INVISIBLE.contains(&c)
}

/// Normalizes a column name for matching.
///
/// Strips invisible characters, trims, lowercases, and collapses internal
/// whitespace runs to a single space.
pub fn normalize_key(raw: &str) -> String {
    let visible: String = raw.chars().filter(|&c| !is_invisible(c)).collect();
    visible
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalizes a cell value: strips invisible characters and trims.
///
/// Internal whitespace and case are preserved; values are delivered as typed.
pub fn normalize_value(raw: &str) -> String {
    let visible: String = raw.chars().filter(|&c| !is_invisible(c)).collect();
    visible.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_strips_bom_and_case() {
        assert_eq!(normalize_key("\u{feff}Ismingiz?"), "ismingiz?");
    }

    #[test]
    fn key_collapses_whitespace() {
        assert_eq!(normalize_key("  Adset \t  Name "), "adset name");
    }

    #[test]
    fn key_folds_cyrillic_case() {
        assert_eq!(normalize_key("Номер_Телефона"), "номер_телефона");
    }

    #[test]
    fn key_drops_zero_width_inside_word() {
        assert_eq!(normalize_key("ad\u{200b}_name"), "ad_name");
    }

    #[test]
    fn value_trims_but_keeps_case() {
        assert_eq!(normalize_value("  Ali Valiyev \u{200b}"), "Ali Valiyev");
    }

    proptest! {
        #[test]
        fn key_normalization_is_idempotent(s in "\\PC{0,30}") {
            let once = normalize_key(&s);
            prop_assert_eq!(normalize_key(&once), once.clone());
        }

        #[test]
        fn value_normalization_is_idempotent(s in "\\PC{0,30}") {
            let once = normalize_value(&s);
            prop_assert_eq!(normalize_value(&once), once.clone());
        }

        #[test]
        fn normalized_key_has_no_invisible_chars(s in "[a-z\u{200b}\u{feff} ]{0,20}") {
            let key = normalize_key(&s);
            prop_assert!(!key.chars().any(is_invisible));
            prop_assert_eq!(key.trim(), key.as_str());
        }
    }
}
