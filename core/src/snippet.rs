use regex::RegexBuilder;

/// Chars kept before the first hit.
const LEAD: usize = 100;
/// Total window length in chars.
const WINDOW: usize = 300;
/// Length of the fallback snippet when nothing matches.
const FALLBACK: usize = 200;

/// Window of `text` around the first case-insensitive hit of any term, with
/// every hit wrapped in `<em>`. Falls back to the leading 200 chars.
pub fn snippet(text: &str, terms: &[String]) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    // to_lowercase can change byte lengths outside ASCII; only trust offsets when it did not
    let first_hit = if lower.len() == text.len() {
        terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter_map(|t| lower.find(&t.to_lowercase()))
            .min()
    } else {
        None
    };

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let snippet = match first_hit {
        Some(byte_idx) => {
            let hit = chars.partition_point(|(i, _)| *i < byte_idx);
            let start = hit.saturating_sub(LEAD);
            let end = (start + WINDOW).min(chars.len());
            slice_chars(text, &chars, start, end)
        }
        None => {
            let end = FALLBACK.min(chars.len());
            let mut s = slice_chars(text, &chars, 0, end);
            if end < chars.len() {
                s.push_str("...");
            }
            s
        }
    };
    Some(highlight_terms(&snippet, terms))
}

fn slice_chars(text: &str, chars: &[(usize, char)], start: usize, end: usize) -> String {
    let from = chars.get(start).map_or(text.len(), |(i, _)| *i);
    let to = chars.get(end).map_or(text.len(), |(i, _)| *i);
    text[from..to].to_string()
}

pub fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        if t.trim().is_empty() {
            continue;
        }
        let Ok(pat) = RegexBuilder::new(&regex::escape(t)).case_insensitive(true).build() else {
            continue;
        };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).into_owned();
    }
    s
}
