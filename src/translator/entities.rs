//! Entity extraction from free text

use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::LazyLock;

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>]+"#).expect("URL pattern must compile")
});

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .expect("email pattern must compile")
});

static DOUBLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]+)""#).expect("quote pattern must compile"));

// Single quotes only count at a word start so apostrophes ("don't") are ignored
static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(\[])'([^'\n]+)'").expect("quote pattern must compile")
});

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.-]*[A-Za-z_][\w-]*\.[A-Za-z0-9]{1,8}$").expect("file pattern must compile")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']'];
const WRAPPING: &[char] = &['"', '\'', '`', '(', '[', '<', '>'];

/// Structured tokens found in an instruction, in order of appearance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Entities {
    pub urls: Vec<String>,
    pub emails: Vec<String>,
    pub quoted: Vec<String>,
    pub paths: Vec<String>,
}

impl Entities {
    pub fn extract(text: &str) -> Self {
        let url_spans: Vec<Range<usize>> = URL.find_iter(text).map(|m| m.range()).collect();
        let urls = url_spans
            .iter()
            .map(|span| text[span.clone()].trim_end_matches(TRAILING_PUNCTUATION).to_string())
            .collect();

        let without_urls = mask(text, &url_spans);
        let email_spans: Vec<Range<usize>> =
            EMAIL.find_iter(&without_urls).map(|m| m.range()).collect();
        let emails = email_spans
            .iter()
            .map(|span| without_urls[span.clone()].to_string())
            .collect();

        let mut quoted_spans: Vec<Range<usize>> = DOUBLE_QUOTED
            .captures_iter(text)
            .chain(SINGLE_QUOTED.captures_iter(text))
            .filter_map(|caps| caps.get(1).map(|m| m.range()))
            .collect();
        quoted_spans.sort_by_key(|span| span.start);
        let quoted = quoted_spans
            .iter()
            .map(|span| text[span.clone()].trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let without_contacts = mask(&without_urls, &email_spans);
        let mut paths = find_paths(&mask(&without_contacts, &quoted_spans));
        if paths.is_empty() {
            paths = find_paths(&without_contacts);
        }

        Self {
            urls,
            emails,
            quoted,
            paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.emails.is_empty() && self.quoted.is_empty() && self.paths.is_empty()
    }
}

/// Replace byte spans with spaces, keeping offsets stable
fn mask(text: &str, spans: &[Range<usize>]) -> String {
    let mut masked = text.to_string();
    for span in spans {
        if let Some(slice) = masked.get(span.clone()) {
            let blank = " ".repeat(slice.len());
            masked.replace_range(span.clone(), &blank);
        }
    }
    masked
}

fn find_paths(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_start_matches(WRAPPING)
                .trim_end_matches(WRAPPING)
                .trim_end_matches(TRAILING_PUNCTUATION)
                .trim_end_matches(WRAPPING)
        })
        .filter(|token| is_path(token))
        .map(str::to_string)
        .collect()
}

fn is_path(token: &str) -> bool {
    if token.is_empty() || token.contains('@') || token.contains("://") {
        return false;
    }
    if token.contains('/') {
        return token.chars().any(|c| c.is_alphanumeric()) || token == "/";
    }
    FILE_NAME.is_match(token)
}
