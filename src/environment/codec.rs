//! Symbol-map encoding for the sentinel record.
//!
//! Symbol maps are flattened to `key=name,key=name,...` with backslash
//! escaping of `\`, `=`, and `,` inside keys and names, so symbols may
//! contain the delimiter characters. Decoding is lenient: entries that do
//! not parse are dropped and counted, and the caller decides whether to
//! rewrite a repaired encoding.

use std::collections::BTreeMap;

const ESCAPE: char = '\\';
const PAIR_SEPARATOR: char = ',';
const KEY_SEPARATOR: char = '=';

/// Flatten `(key, name)` entries into the persisted encoding.
pub fn encode_symbol_map<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (index, (key, name)) in entries.into_iter().enumerate() {
        if index > 0 {
            out.push(PAIR_SEPARATOR);
        }
        escape_into(key, &mut out);
        out.push(KEY_SEPARATOR);
        escape_into(name, &mut out);
    }
    out
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        if matches!(c, ESCAPE | PAIR_SEPARATOR | KEY_SEPARATOR) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Parse the persisted encoding back into a map.
///
/// Returns the decoded entries and the number of malformed entries that
/// were dropped (missing `=`, empty key, stray unescaped `=` in the name,
/// or a dangling escape).
pub fn decode_symbol_map(encoded: &str) -> (BTreeMap<String, String>, usize) {
    let mut map = BTreeMap::new();
    let mut dropped = 0usize;
    if encoded.is_empty() {
        return (map, dropped);
    }

    let mut key = String::new();
    let mut name = String::new();
    let mut in_name = false;
    let mut escaped = false;
    let mut malformed = false;

    let mut commit = |key: &str, name: &str, in_name: bool, malformed: bool| {
        if in_name && !malformed && !key.is_empty() {
            map.insert(key.to_string(), name.to_string());
        } else {
            dropped += 1;
        }
    };

    for c in encoded.chars() {
        if escaped {
            if in_name {
                name.push(c);
            } else {
                key.push(c);
            }
            escaped = false;
            continue;
        }
        match c {
            ESCAPE => escaped = true,
            KEY_SEPARATOR => {
                if in_name {
                    malformed = true;
                } else {
                    in_name = true;
                }
            }
            PAIR_SEPARATOR => {
                commit(&key, &name, in_name, malformed);
                key.clear();
                name.clear();
                in_name = false;
                malformed = false;
            }
            _ => {
                if in_name {
                    name.push(c);
                } else {
                    key.push(c);
                }
            }
        }
    }
    // A dangling trailing escape poisons the final entry.
    commit(&key, &name, in_name, malformed || escaped);

    (map, dropped)
}
