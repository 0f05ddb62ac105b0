//! Metric and label name normalization.
//!
//! Firehose names mix camel case, dots and slashes
//! (`/p.fake/CounterEvent2`); Prometheus wants lowercase snake case
//! (`p_fake_counter_event_2`).

use std::sync::LazyLock;

use regex::Regex;

static TRAILING_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z]*$").expect("valid regex"));

static UUID_V4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-4[a-fA-F0-9]{3}-[89aAbB][a-fA-F0-9]{3}-[a-fA-F0-9]{12}$",
    )
    .expect("valid regex")
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

fn class_of(c: char) -> CharClass {
    if c.is_lowercase() {
        CharClass::Lower
    } else if c.is_uppercase() {
        CharClass::Upper
    } else if c.is_ascii_digit() {
        CharClass::Digit
    } else {
        CharClass::Other
    }
}

/// Split on character-class boundaries, keeping acronyms together.
///
/// `HTTPServer` → `HTTP`, `Server`; `CounterEvent2` → `Counter`, `Event`, `2`.
fn split_camel_case(s: &str) -> Vec<String> {
    let mut runs: Vec<Vec<char>> = Vec::new();
    let mut last = None;

    for c in s.chars() {
        let class = class_of(c);
        match runs.last_mut() {
            Some(run) if last == Some(class) => run.push(c),
            _ => runs.push(vec![c]),
        }
        last = Some(class);
    }

    // An upper-case run followed by a lower-case run donates its last letter.
    for i in 0..runs.len().saturating_sub(1) {
        let starts_upper = runs[i].first().is_some_and(|c| c.is_uppercase());
        let next_lower = runs[i + 1].first().is_some_and(|c| c.is_lowercase());
        if starts_upper && next_lower {
            if let Some(c) = runs[i].pop() {
                runs[i + 1].insert(0, c);
            }
        }
    }

    runs.into_iter()
        .filter(|run| !run.is_empty())
        .map(|run| run.into_iter().collect())
        .collect()
}

/// Normalize a firehose name into a Prometheus-safe snake-case token.
pub fn normalize_name(name: &str) -> String {
    split_camel_case(name)
        .iter()
        .filter_map(|word| {
            let trimmed = word.trim_matches('_');
            let safe = TRAILING_UNSAFE.replace(trimmed, "_");
            let lower = safe.trim_matches('_').to_lowercase();
            let lower = lower.trim();
            (!lower.is_empty()).then(|| lower.to_string())
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Rewrite a leading `/p.` for use in HELP text.
pub fn normalize_name_desc(desc: &str) -> String {
    match desc.strip_prefix("/p.") {
        Some(rest) => format!("/p-{rest}"),
        None => desc.to_string(),
    }
}

/// Replace dots in an origin for use in HELP text.
pub fn normalize_origin_desc(desc: &str) -> String {
    desc.replace('.', "-")
}

/// Whether `s` is a canonical version-4 UUID.
///
/// Application-emitted metrics use a generated UUID as their origin.
pub fn is_valid_uuid(s: &str) -> bool {
    UUID_V4.is_match(s)
}
