//! Character-level Unicode classification for Japanese IME text.

use std::sync::OnceLock;

use crate::flat::FlatSet;

/// Script class of a single codepoint, as used by the converter for
/// synthetic-node generation and candidate filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Hiragana,
    Katakana,
    Kanji,
    Alphabet,
    Number,
    Other,
}

/// Half-width/full-width form of a codepoint. Character-type nodes only
/// span runs of the same script *and* form, so that e.g. half-width and
/// full-width alphabet do not merge into one unknown word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    HalfWidth,
    FullWidth,
}

/// Check the full Hiragana block (U+3040..U+309F). A few unassigned
/// codepoints are included but never appear in IME input or readings.
pub fn is_hiragana(c: char) -> bool {
    ('\u{3040}'..='\u{309F}').contains(&c)
}

/// Check the full Katakana block (U+30A0..U+30FF), plus the half-width
/// katakana block (U+FF66..U+FF9D).
pub fn is_katakana(c: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&c) || ('\u{FF66}'..='\u{FF9D}').contains(&c)
}

pub fn is_kanji(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
        || ('\u{3400}'..='\u{4DBF}').contains(&c)
        || ('\u{20000}'..='\u{2A6DF}').contains(&c)
        || c == '\u{3005}' // 々
}

pub fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic() || ('\u{FF21}'..='\u{FF3A}').contains(&c) || ('\u{FF41}'..='\u{FF5A}').contains(&c)
}

pub fn is_ascii_digit_char(c: char) -> bool {
    c.is_ascii_digit() || ('\u{FF10}'..='\u{FF19}').contains(&c)
}

pub fn char_script(c: char) -> Script {
    if is_hiragana(c) {
        Script::Hiragana
    } else if is_katakana(c) {
        Script::Katakana
    } else if is_kanji(c) {
        Script::Kanji
    } else if is_latin(c) {
        Script::Alphabet
    } else if is_ascii_digit_char(c) {
        Script::Number
    } else {
        Script::Other
    }
}

pub fn char_form(c: char) -> Form {
    if c.is_ascii() || ('\u{FF61}'..='\u{FF9F}').contains(&c) {
        Form::HalfWidth
    } else {
        Form::FullWidth
    }
}

/// Script of a whole string: `Some(script)` when every character belongs to
/// the same class, `None` when empty or mixed. The prolonged sound mark ー
/// extends either kana script.
pub fn script_type(s: &str) -> Option<Script> {
    let mut result: Option<Script> = None;
    for c in s.chars() {
        if c == 'ー' {
            if matches!(result, None | Some(Script::Hiragana) | Some(Script::Katakana)) {
                continue;
            }
            return None;
        }
        let script = char_script(c);
        match result {
            None => result = Some(script),
            Some(r) if r == script => {}
            Some(_) => return None,
        }
    }
    result
}

pub fn is_script(s: &str, script: Script) -> bool {
    script_type(s) == Some(script)
}

pub fn contains_script(s: &str, script: Script) -> bool {
    s.chars().any(|c| char_script(c) == script)
}

/// Number of characters (not bytes).
pub fn chars_len(s: &str) -> usize {
    s.chars().count()
}

/// Convert a hiragana string to katakana. Other characters pass through.
pub fn hiragana_to_katakana(s: &str) -> String {
    s.chars()
        .map(|c| {
            if ('\u{3041}'..='\u{3096}').contains(&c) {
                char::from_u32(c as u32 + 0x60).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

/// Fold full-width ASCII (U+FF01..U+FF5E) and the ideographic space to the
/// half-width range. Applied to history segments so that committed
/// full-width numbers and Latin text match dictionary keys.
pub fn full_width_ascii_to_half_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// An English transliteration is a plain ASCII-alphabet word (optionally
/// with inner spaces or hyphens), e.g. "test" for てすと.
pub fn is_english_transliteration(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphabetic() || c == ' ' || c == '-')
        && s.chars().any(|c| c.is_ascii_alphabetic())
}

/// Whitespace check used to coalesce segments in reverse conversion:
/// TAB, half-width and full-width spaces only.
pub fn is_whitespace_only(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| matches!(c, '\t' | ' ' | '\u{3000}'))
}

fn kanji_numerals() -> &'static FlatSet<char> {
    static SET: OnceLock<FlatSet<char>> = OnceLock::new();
    SET.get_or_init(|| {
        FlatSet::new(vec![
            '〇', '一', '二', '三', '四', '五', '六', '七', '八', '九', '十', '百', '千', '万',
            '億', '兆',
        ])
    })
}

/// Kanji numeral check for the multiple-number candidate filter.
pub fn is_kanji_numeral(c: char) -> bool {
    kanji_numerals().contains(&c)
}
