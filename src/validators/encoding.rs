//! Encoding cleanup: a fixed mojibake substitution
//! table plus whitespace/BOM normalisation, idempotent by construction —
//! running it twice produces the same output as running it once.

const BOM: char = '\u{feff}';

/// Common UTF-8-mis-decoded-as-Latin-1 mojibake sequences, mapped back to
/// their intended character. Ordered longest-match-first so multi-byte
/// sequences are not partially consumed by a shorter entry.
const MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("\u{e2}\u{80}\u{9c}", "\u{201c}"), // “
    ("\u{e2}\u{80}\u{9d}", "\u{201d}"), // ”
    ("\u{e2}\u{80}\u{98}", "\u{2018}"), // ‘
    ("\u{e2}\u{80}\u{99}", "\u{2019}"), // ’
    ("\u{e2}\u{80}\u{93}", "\u{2013}"), // –
    ("\u{e2}\u{80}\u{94}", "\u{2014}"), // —
    ("\u{e2}\u{80}\u{a6}", "\u{2026}"), // …
    ("\u{c3}\u{a9}", "\u{e9}"),         // é
    ("\u{c3}\u{a8}", "\u{e8}"),         // è
    ("\u{c3}\u{a0}", "\u{e0}"),         // à
    ("\u{c2}\u{a0}", " "),              // non-breaking space artifact
];

/// Replace every mojibake sequence in `text` with its intended character,
/// strip a leading BOM, normalise all whitespace runs to single spaces
/// (preserving paragraph breaks as a single newline), and trim. Calling
/// this twice in a row is a no-op on the second pass.
pub fn clean(text: &str) -> String {
    let mut cleaned = text.strip_prefix(BOM).unwrap_or(text).to_string();
    for (bad, good) in MOJIBAKE_TABLE {
        cleaned = cleaned.replace(bad, good);
    }
    normalise_whitespace(&cleaned)
}

fn normalise_whitespace(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    paragraphs.join("\n").trim().to_string()
}

/// Whether `clean` is a no-op on `text` — used to assert idempotence in
/// tests and to skip redundant work when a segment is already clean.
pub fn is_clean(text: &str) -> bool {
    clean(text) == text
}
