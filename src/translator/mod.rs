//! Intent translation for free-text requests
//!
//! Translation is keyword based and never fails: text that matches no
//! category becomes [`Intent::General`] with no candidate operation. The
//! categories are checked in a fixed order and the first match wins.

pub mod entities;

pub use entities::Entities;

use serde::Serialize;
use serde_json::{Map, Value};

/// Coarse intent category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FileOperations,
    VersionControl,
    Messaging,
    Search,
    Web,
    Memory,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FileOperations => "file_operations",
            Intent::VersionControl => "version_control",
            Intent::Messaging => "messaging",
            Intent::Search => "search",
            Intent::Web => "web",
            Intent::Memory => "memory",
            Intent::General => "general",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`translate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub intent: Intent,
    pub entities: Entities,
    pub candidate_operation: Option<String>,
    pub parameters: Map<String, Value>,
}

impl Translation {
    /// Lowercased words of the original text, used for operation search
    /// when no candidate operation was derived
    pub fn keywords(text: &str) -> Vec<String> {
        words(text)
            .into_iter()
            .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
            .collect()
    }
}

const FILE_WORDS: &[&str] = &[
    "file", "files", "folder", "folders", "directory", "directories", "dir",
];
const VERSION_CONTROL_WORDS: &[&str] = &[
    "git", "commit", "commits", "branch", "branches", "repository", "repo", "merge", "rebase",
];
const MESSAGING_WORDS: &[&str] = &[
    "send", "message", "messages", "email", "mail", "notify", "slack", "dm",
];
const SEARCH_WORDS: &[&str] = &["search", "find", "lookup", "look", "query"];
const WEB_WORDS: &[&str] = &[
    "web", "website", "webpage", "url", "http", "https", "fetch", "download", "browse",
];
const MEMORY_WORDS: &[&str] = &[
    "remember", "memory", "memories", "recall", "forget", "memorize",
];

const DELETE_VERBS: &[&str] = &["delete", "remove", "rm", "erase"];
const WRITE_VERBS: &[&str] = &["write", "save", "create", "append", "put"];
const LIST_VERBS: &[&str] = &["list", "ls"];
const READ_VERBS: &[&str] = &["read", "open", "show", "cat", "view", "display", "print", "get"];
const RECALL_VERBS: &[&str] = &["recall", "what", "retrieve", "search", "find"];
const STORE_VERBS: &[&str] = &["remember", "memorize", "store", "save", "note"];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "from", "into", "with", "that", "this", "please", "can", "you", "my",
    "all", "any", "about",
];

/// Classify an instruction and derive a candidate call
pub fn translate(text: &str) -> Translation {
    let entities = Entities::extract(text);
    let words = words(text);
    let has = |set: &[&str]| words.iter().any(|w| set.contains(&w.as_str()));

    let intent = if has(FILE_WORDS) {
        Intent::FileOperations
    } else if has(VERSION_CONTROL_WORDS) {
        Intent::VersionControl
    } else if has(MESSAGING_WORDS) || !entities.emails.is_empty() {
        Intent::Messaging
    } else if has(SEARCH_WORDS) {
        Intent::Search
    } else if has(WEB_WORDS) || !entities.urls.is_empty() {
        Intent::Web
    } else if has(MEMORY_WORDS) {
        Intent::Memory
    } else {
        Intent::General
    };

    let candidate_operation = match intent {
        Intent::FileOperations => {
            if has(DELETE_VERBS) {
                Some("delete_file")
            } else if has(WRITE_VERBS) {
                Some("write_file")
            } else if has(LIST_VERBS)
                || (words.iter().any(|w| matches!(w.as_str(), "directory" | "folder" | "dir"))
                    && !has(READ_VERBS))
            {
                Some("list_directory")
            } else if has(READ_VERBS) {
                Some("read_file")
            } else {
                None
            }
        }
        Intent::VersionControl => has(&["commit"]).then_some("git_commit"),
        Intent::Messaging => Some("send_message"),
        Intent::Search => Some("search"),
        Intent::Web => Some("fetch_url"),
        Intent::Memory => {
            if has(RECALL_VERBS) {
                Some("search_memories")
            } else if has(STORE_VERBS) {
                Some("add_memory")
            } else {
                None
            }
        }
        Intent::General => None,
    }
    .map(str::to_string);

    let parameters = build_parameters(text, intent, candidate_operation.as_deref(), &entities);

    tracing::debug!(
        intent = %intent,
        operation = ?candidate_operation,
        parameter_count = parameters.len(),
        "Translated request"
    );

    Translation {
        intent,
        entities,
        candidate_operation,
        parameters,
    }
}

fn build_parameters(
    text: &str,
    intent: Intent,
    operation: Option<&str>,
    entities: &Entities,
) -> Map<String, Value> {
    let mut parameters = Map::new();
    if let Some(path) = entities.paths.first() {
        parameters.insert("path".to_string(), Value::String(path.clone()));
    }
    if let Some(url) = entities.urls.first() {
        parameters.insert("url".to_string(), Value::String(url.clone()));
    }
    if let Some(email) = entities.emails.first() {
        parameters.insert("to".to_string(), Value::String(email.clone()));
    }

    let wants_query = intent == Intent::Search || operation == Some("search_memories");
    let text_key = if wants_query { "query" } else { "content" };
    let quoted = entities.quoted.first().cloned();

    let free_text = match (quoted, intent, operation) {
        (Some(q), _, _) => Some(q),
        (None, Intent::Search, _) => remainder_after(text, SEARCH_WORDS),
        (None, _, Some("add_memory")) => remainder_after(text, STORE_VERBS),
        (None, _, Some("search_memories")) => remainder_after(text, RECALL_VERBS),
        _ => None,
    };
    if let Some(value) = free_text {
        parameters.insert(text_key.to_string(), Value::String(value));
    }
    parameters
}

/// Text following the first keyword, minus connective words
fn remainder_after(text: &str, keywords: &[&str]) -> Option<String> {
    let mut tokens = text.split_whitespace();
    tokens.by_ref().find(|t| keywords.contains(&normalize(t).as_str()))?;

    let rest: Vec<&str> = tokens
        .skip_while(|t| matches!(normalize(t).as_str(), "for" | "that" | "about" | "up" | "me"))
        .collect();
    let joined = rest.join(" ");
    let trimmed = joined.trim().trim_end_matches(['.', '?', '!']).trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn normalize(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_file_request() {
        let t = translate("Read the file README.md");
        assert_eq!(t.intent, Intent::FileOperations);
        assert_eq!(t.candidate_operation.as_deref(), Some("read_file"));
        assert_eq!(t.parameters["path"], "README.md");
    }

    #[test]
    fn test_file_verbs_map_to_operations() {
        let cases = [
            ("write 'hello' to the file notes.txt", "write_file"),
            ("list the files in src/", "list_directory"),
            ("delete the file old.log", "delete_file"),
            ("what is in this folder /tmp", "list_directory"),
        ];
        for (text, expected) in cases {
            assert_eq!(
                translate(text).candidate_operation.as_deref(),
                Some(expected),
                "for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_write_carries_quoted_content() {
        let t = translate("write 'hello world' to the file notes.txt");
        assert_eq!(t.parameters["content"], "hello world");
        assert_eq!(t.parameters["path"], "notes.txt");
    }

    #[test]
    fn test_file_category_wins_over_later_ones() {
        let t = translate("search the files for TODO");
        assert_eq!(t.intent, Intent::FileOperations);
    }

    #[test]
    fn test_commit_request() {
        let t = translate("commit the staged changes with message 'fix typo'");
        assert_eq!(t.intent, Intent::VersionControl);
        assert_eq!(t.candidate_operation.as_deref(), Some("git_commit"));
        assert_eq!(t.parameters["content"], "fix typo");
    }

    #[test]
    fn test_version_control_without_commit_has_no_operation() {
        let t = translate("which branch am I on");
        assert_eq!(t.intent, Intent::VersionControl);
        assert_eq!(t.candidate_operation, None);
    }

    #[test]
    fn test_email_address_implies_messaging() {
        let t = translate("tell bob@example.com 'lunch at noon'");
        assert_eq!(t.intent, Intent::Messaging);
        assert_eq!(t.candidate_operation.as_deref(), Some("send_message"));
        assert_eq!(t.parameters["to"], "bob@example.com");
        assert_eq!(t.parameters["content"], "lunch at noon");
    }

    #[test]
    fn test_search_uses_remainder_as_query() {
        let t = translate("search for rust async tutorials.");
        assert_eq!(t.intent, Intent::Search);
        assert_eq!(t.candidate_operation.as_deref(), Some("search"));
        assert_eq!(t.parameters["query"], "rust async tutorials");
    }

    #[test]
    fn test_search_prefers_quoted_query() {
        let t = translate("find 'tokio select' examples");
        assert_eq!(t.parameters["query"], "tokio select");
    }

    #[test]
    fn test_url_implies_web() {
        let t = translate("grab https://example.com/page for me");
        assert_eq!(t.intent, Intent::Web);
        assert_eq!(t.candidate_operation.as_deref(), Some("fetch_url"));
        assert_eq!(t.parameters["url"], "https://example.com/page");
    }

    #[test]
    fn test_memory_store_and_recall() {
        let stored = translate("remember that the deploy key rotates monthly");
        assert_eq!(stored.intent, Intent::Memory);
        assert_eq!(stored.candidate_operation.as_deref(), Some("add_memory"));
        assert_eq!(stored.parameters["content"], "the deploy key rotates monthly");

        let recalled = translate("recall my memories about deploy keys");
        assert_eq!(recalled.candidate_operation.as_deref(), Some("search_memories"));
        assert_eq!(recalled.parameters["query"], "my memories about deploy keys");
    }

    #[test]
    fn test_unmatched_text_is_general() {
        let t = translate("good morning");
        assert_eq!(t.intent, Intent::General);
        assert_eq!(t.candidate_operation, None);
        assert!(t.parameters.is_empty());
    }

    #[test]
    fn test_empty_text_never_fails() {
        let t = translate("");
        assert_eq!(t.intent, Intent::General);
        assert!(t.entities.is_empty());
    }

    #[test]
    fn test_keywords_drop_stop_words() {
        assert_eq!(
            Translation::keywords("Please convert the image to PNG"),
            vec!["convert", "image", "png"]
        );
    }

    #[test]
    fn test_intent_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Intent::FileOperations).unwrap(),
            "file_operations"
        );
    }
}
