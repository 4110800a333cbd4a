use std::borrow::Cow;
use tracing::warn;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 20;

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Parse a numeric cell. Accepts a decimal comma when no dot is present
/// (`"12,0"`), since exam microdata is often exported with a pt-BR locale.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = clean_str(raw);
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = s.parse::<f64>() {
        return Some(v);
    }
    if !s.contains('.') && s.matches(',').count() == 1 {
        return s.replace(',', ".").parse::<f64>().ok();
    }
    None
}

/// Decode a text file: strip a UTF-8 BOM, fall back to Latin-1 for
/// byte sequences that are not valid UTF-8.
pub fn decode_text<'a>(name: &str, data: &'a [u8]) -> Cow<'a, str> {
    let body = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    match std::str::from_utf8(body) {
        Ok(s) => Cow::Borrowed(s),
        Err(e) => {
            warn!(source = %name, offset = e.valid_up_to(), "input is not UTF-8, decoding as Latin-1");
            Cow::Owned(body.iter().map(|&b| b as char).collect())
        }
    }
}

/// Count delimiter occurrences outside double quotes.
fn count_unquoted(line: &str, delim: u8) -> usize {
    let mut in_quotes = false;
    let mut n = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delim && !in_quotes {
            n += 1;
        }
    }
    n
}

/// Pick the delimiter from the first non-blank lines.
///
/// A candidate whose count is non-zero and identical on every sampled line is
/// preferred; among those (or, failing that, among all candidates) the one
/// with the most occurrences on the header line wins. Defaults to `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    let Some(header) = lines.first() else {
        return b',';
    };

    let mut consistent: Option<(u8, usize)> = None;
    let mut loose: Option<(u8, usize)> = None;
    for &delim in &DELIMITER_CANDIDATES {
        let head = count_unquoted(header, delim);
        if head == 0 {
            continue;
        }
        if loose.map_or(true, |(_, best)| head > best) {
            loose = Some((delim, head));
        }
        let stable = lines.iter().all(|l| count_unquoted(l, delim) == head);
        if stable && consistent.map_or(true, |(_, best)| head > best) {
            consistent = Some((delim, head));
        }
    }

    consistent.or(loose).map(|(d, _)| d).unwrap_or(b',')
}
