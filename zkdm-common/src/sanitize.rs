//! Canonical text form of a computation definition.
//!
//! Request forms deliver code wrapped in editor markup with HTML entities.
//! Both the key-derivation service and the computation digest consume the
//! sanitised form, so the same logical code always maps to the same key.

use unicode_normalization::UnicodeNormalization;

const LINE_BREAK_TAGS: &[&str] = &["br", "/p", "/div", "/li", "/pre"];
const LINE_SEPARATOR: char = '\u{2028}';

/// Strips markup tags, decodes entities, applies NFKC, normalises line
/// endings, drops one leading line separator and trailing whitespace.
pub fn sanitize_computation(code: &str) -> String {
    let stripped = strip_markup(code);
    let decoded = decode_entities(&stripped);
    let normalized: String = decoded.nfkc().collect();
    let unified = normalized.replace("\r\n", "\n").replace(['\r', LINE_SEPARATOR], "\n");
    let body = unified.strip_prefix('\n').unwrap_or(&unified);
    body.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match tag_len(candidate) {
            Some((len, name)) => {
                if LINE_BREAK_TAGS.contains(&name.to_ascii_lowercase().as_str()) {
                    out.push('\n');
                }
                rest = &candidate[len..];
            }
            None => {
                out.push('<');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Length of the tag at the start of `s` and its name (with a leading `/`
/// for closing tags). Comparisons such as `a < b` are not tags.
fn tag_len(s: &str) -> Option<(usize, &str)> {
    let bytes = s.as_bytes();
    let name_start = if bytes.get(1) == Some(&b'/') { 2 } else { 1 };
    if !bytes.get(name_start)?.is_ascii_alphabetic() {
        return None;
    }
    let name_end = bytes[name_start..]
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'-'))
        .map(|offset| name_start + offset)?;
    match bytes[name_end] {
        b'>' | b'/' | b' ' | b'\t' => {}
        _ => return None,
    }
    let close = bytes[name_end..]
        .iter()
        .position(|b| matches!(b, b'>' | b'<' | b'\n'))
        .map(|offset| name_end + offset)?;
    if bytes[close] != b'>' {
        return None;
    }
    Some((close + 1, &s[1..name_end]))
}

fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match candidate.find(';').filter(|&end| end <= 10) {
            Some(end) => match decode_entity(&candidate[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &candidate[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
