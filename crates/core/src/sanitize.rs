pub const MAX_STEM_CHARS: usize = 200;
pub const FALLBACK_STEM: &str = "unnamed_file";

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Cleans one filename part: forbidden characters dropped, whitespace runs
/// turned into `_`.
pub fn sanitize_component(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|ch| !is_forbidden_char(*ch) && !ch.is_control())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Makes a joined stem safe to use as a file name.
pub fn sanitize_stem(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_control() {
            continue;
        }
        if is_forbidden_char(ch) {
            out.push('_');
        } else {
            out.push(ch);
        }
    }

    let mut out = trim_edges(&cleanup_filename(&out));
    if out.chars().count() > MAX_STEM_CHARS {
        out = trim_edges(&out.chars().take(MAX_STEM_CHARS).collect::<String>());
    }

    if out.is_empty() {
        return FALLBACK_STEM.to_string();
    }
    if is_windows_reserved(&out) {
        out.push_str("_file");
    }
    out
}

/// Collapses runs of the same separator character into one.
pub fn cleanup_filename(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep: Option<char> = None;

    for ch in value.chars() {
        if is_collapse_separator(ch) {
            if prev_sep == Some(ch) {
                continue;
            }
            prev_sep = Some(ch);
        } else {
            prev_sep = None;
        }
        out.push(ch);
    }
    out
}

/// Shortens a stem so that `stem + extension` fits in `limit` characters.
///
/// A trailing numeric token (the counter) is kept intact. The longest
/// free-text token is trimmed first; purely numeric tokens such as date
/// parts are only trimmed once no text is left.
pub fn truncate_stem(stem: &str, extension_with_dot: &str, limit: usize) -> String {
    let available = limit.saturating_sub(extension_with_dot.chars().count());
    if stem.chars().count() <= available {
        return stem.to_string();
    }

    let (body, counter) = split_trailing_counter(stem);
    let counter_len = counter.chars().count();
    if counter_len >= available {
        return trim_edges(&stem.chars().take(available).collect::<String>());
    }
    let budget = available - counter_len;

    // Each token with the separator that followed it.
    let mut pieces: Vec<(Vec<char>, Option<char>)> = Vec::new();
    let mut current = Vec::new();
    for ch in body.chars() {
        if ch == '_' || ch == '-' {
            pieces.push((std::mem::take(&mut current), Some(ch)));
        } else {
            current.push(ch);
        }
    }
    pieces.push((current, None));

    let render = |pieces: &[(Vec<char>, Option<char>)]| -> String {
        let mut out = String::with_capacity(budget);
        for (token, sep) in pieces {
            out.extend(token.iter());
            if let Some(sep) = sep {
                out.push(*sep);
            }
        }
        trim_edges(&out)
    };
    while render(&pieces).chars().count() > budget {
        let Some(index) = (0..pieces.len()).max_by_key(|&i| {
            let token = &pieces[i].0;
            (token.iter().any(|c| !c.is_ascii_digit()), token.len())
        }) else {
            break;
        };
        if pieces[index].0.len() <= 1 {
            pieces.remove(index);
        } else {
            pieces[index].0.pop();
        }
    }

    trim_edges(&format!("{}{}", render(&pieces), counter))
}

/// Splits `name_001` into (`name`, `_001`).
fn split_trailing_counter(stem: &str) -> (&str, &str) {
    match stem.rfind(['_', '-']) {
        Some(i)
            if i + 1 < stem.len() && stem[i + 1..].chars().all(|c| c.is_ascii_digit()) =>
        {
            (&stem[..i], &stem[i..])
        }
        _ => (stem, ""),
    }
}

pub(crate) fn is_disallowed_char(ch: char) -> bool {
    is_forbidden_char(ch) || ch.is_control()
}

fn is_forbidden_char(ch: char) -> bool {
    matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

fn is_collapse_separator(ch: char) -> bool {
    matches!(ch, '_' | '-' | ' ' | '.')
}

fn trim_edges(value: &str) -> String {
    value
        .trim_matches(|c: char| c == '_' || c == '-' || c == ' ' || c == '.')
        .to_string()
}

fn is_windows_reserved(value: &str) -> bool {
    let stem = value
        .split('.')
        .next()
        .unwrap_or(value)
        .to_ascii_uppercase();
    WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| reserved == &stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_compacts_repeated_separators() {
        assert_eq!(cleanup_filename("__hello___world--x..y"), "_hello_world-x.y");
    }

    #[test]
    fn stem_replaces_forbidden_and_strips_control() {
        assert_eq!(sanitize_stem("a:b\u{7}c?"), "a_bc");
        assert_eq!(sanitize_stem("  ..trip__day.. "), "trip_day");
    }

    #[test]
    fn stem_falls_back_when_empty_and_guards_reserved_names() {
        assert_eq!(sanitize_stem("..."), FALLBACK_STEM);
        assert_eq!(sanitize_stem("AUX"), "AUX_file");
    }

    #[test]
    fn stem_is_capped() {
        let long = "x".repeat(300);
        assert_eq!(sanitize_stem(&long).chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn component_drops_forbidden_and_joins_whitespace() {
        assert_eq!(sanitize_component(" EOS  R5 / mk2 "), "EOS_R5_mk2");
    }

    #[test]
    fn truncate_keeps_counter_and_trims_longest_text() {
        let stem = "2024-06-01_Holiday_Beach_001";
        assert_eq!(truncate_stem(stem, ".JPG", 100), stem);
        assert_eq!(truncate_stem(stem, ".JPG", 24), "2024-06-01_Ho_Be_001");
        assert_eq!(truncate_stem("abcdefghij", ".JPG", 8), "abcd");
    }

    #[test]
    fn truncate_drops_text_entirely_before_touching_the_date() {
        let stem = "2024-06-01-Summer_Vacation-042";
        assert_eq!(truncate_stem(stem, ".ARW", 18), "2024-06-01-042");
    }
}
