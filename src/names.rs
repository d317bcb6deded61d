// 🔤 Name Normalization - decide when two spellings are the same name
//
// "株式会社トヨタ", "トヨタ（株）" and "ﾄﾖﾀ 株式会社" all collate equal.
// Only Japanese legal-entity markers are stripped. English designators are
// left alone on purpose: "A Corp" → "A Corporation" is a recorded rename.

use unicode_normalization::UnicodeNormalization;

/// Legal-entity markers, in their post-NFKC form (full-width parentheses and
/// the ㈱-style ligatures fold into these under NFKC).
const ENTITY_MARKERS: &[&str] = &[
    "一般社団法人",
    "一般財団法人",
    "公益社団法人",
    "公益財団法人",
    "株式会社",
    "有限会社",
    "合同会社",
    "合資会社",
    "合名会社",
    "(株)",
    "(有)",
    "(合)",
    "(社)",
    "(財)",
];

/// Values that upstream sources use to mean "nothing here".
const PLACEHOLDERS: &[&str] = &["", "-", "nan", "none", "null", "n/a"];

/// Attribute values that carry no information about an issuer's
/// classification (the exchange's catch-all bucket).
const ATTRIBUTE_PLACEHOLDERS: &[&str] = &["その他", "other"];

// ============================================================================
// PLACEHOLDERS
// ============================================================================

pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    PLACEHOLDERS.contains(&v.as_str())
}

/// Placeholder test for classification attributes (sector, market).
pub fn is_placeholder_attribute(value: &str) -> bool {
    is_placeholder(value) || ATTRIBUTE_PLACEHOLDERS.contains(&value.trim().to_lowercase().as_str())
}

/// Trim, and turn placeholders into `None`.
pub fn clean(value: Option<&str>) -> Option<String> {
    let v = value?.trim();
    if is_placeholder(v) {
        None
    } else {
        Some(v.to_string())
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Canonical comparison key for an issuer name.
///
/// NFKC (folds full/half-width variants), drops every kind of whitespace,
/// strips legal-entity markers and lowercases. If stripping would leave
/// nothing, the marker text itself is kept so two different bare markers
/// still compare by content.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .nfkc()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let mut stripped = folded.clone();
    for marker in ENTITY_MARKERS {
        if stripped.contains(marker) {
            stripped = stripped.replace(marker, "");
        }
    }

    if stripped.is_empty() {
        folded
    } else {
        stripped
    }
}

/// True when two raw names are the same name after normalization.
pub fn same_name(a: &str, b: &str) -> bool {
    normalize_name(a) == normalize_name(b)
}

// ============================================================================
// TESTS
// ============================================================================
