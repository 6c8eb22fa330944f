//! Forbidden-word filter for nicknames and chat content.
//!
//! Text is normalised before matching: lower-cased, common leetspeak
//! substitutions undone, zero-width joiners dropped and every run of
//! separators collapsed to one space. Single words match on word
//! boundaries; multi-word phrases match as substrings of both the spaced
//! and the separator-stripped form.
//!
//! This is best-effort obfuscation resistance. Substitutions outside the
//! fixed table (homoglyphs, novel spellings, inserted letters) bypass it.

use std::sync::LazyLock;

use regex::Regex;

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\W_]+").expect("static regex"));

fn unleet(c: char) -> char {
    match c {
        '0' => 'o',
        '1' | '!' => 'i',
        '3' => 'e',
        '4' | '@' => 'a',
        '5' | '$' => 's',
        '7' => 't',
        other => other,
    }
}

/// Canonical form used for matching.
pub fn normalise(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\u{200C}' | '\u{200D}'))
        .map(unleet)
        .collect();
    SEPARATORS.replace_all(&mapped, " ").trim().to_string()
}

/// Merge runs of single-character tokens: `"d a r n it"` becomes `"darn it"`.
fn join_spelled_out(normalised: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut run = String::new();
    for token in normalised.split(' ') {
        if token.chars().count() == 1 {
            run.push_str(token);
            continue;
        }
        if !run.is_empty() {
            out.push(std::mem::take(&mut run));
        }
        out.push(token.to_string());
    }
    if !run.is_empty() {
        out.push(run);
    }
    out.join(" ")
}

#[derive(Debug, Clone)]
struct Phrase {
    spaced: String,
    merged: String,
}

/// Compiled forbidden patterns. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ModerationFilter {
    words: Option<Regex>,
    phrases: Vec<Phrase>,
    len: usize,
}

impl ModerationFilter {
    /// Compile a filter from raw list entries. Entries that normalise to
    /// nothing are ignored.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words = Vec::new();
        let mut phrases = Vec::new();

        for entry in entries {
            let norm = normalise(entry.as_ref());
            if norm.is_empty() {
                continue;
            }
            if norm.contains(' ') {
                phrases.push(Phrase {
                    merged: norm.replace(' ', ""),
                    spaced: norm,
                });
            } else {
                words.push(regex::escape(&norm));
            }
        }

        words.sort();
        words.dedup();
        let len = words.len() + phrases.len();
        let words = if words.is_empty() {
            None
        } else {
            // Escaped literals joined by `|` always form a valid pattern.
            Regex::new(&format!(r"\b(?:{})\b", words.join("|"))).ok()
        };

        Self { words, phrases, len }
    }

    /// Number of compiled entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains_forbidden(&self, text: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let norm = normalise(text);
        if norm.is_empty() {
            return false;
        }

        if let Some(words) = &self.words
            && (words.is_match(&norm) || words.is_match(&join_spelled_out(&norm)))
        {
            return true;
        }

        let merged = norm.replace(' ', "");
        self.phrases
            .iter()
            .any(|p| norm.contains(&p.spaced) || merged.contains(&p.merged))
    }
}
