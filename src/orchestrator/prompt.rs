use std::fs;
use std::path::Path;

use anyhow::Context;

/// Default system instruction compiled into the binary. An operator can
/// replace it wholesale via `TABULA_PROMPT_PATH`.
const DEFAULT_TEMPLATE: &str = "\
You are Tabula, a friendly data analyst for social media creators. You help \
users explore their tweet exports and YouTube channel data through \
conversation. Answer from tool results when tools are available; never invent \
numbers. Keep answers short and concrete, and mention the specific metric \
values you used. When a chart or video card has already been rendered for the \
user, refer to it instead of describing it again.";

/// Phrases that introduce a user's name in conversation.
const NAME_INTROS: &[&str] = &["my name is", "call me", "i'm", "i am"];

/// System-prompt template, loaded once at startup and passed explicitly to
/// the orchestrators.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptConfig {
    const PATH_VARS: [&'static str; 2] = ["TABULA_PROMPT_PATH", "PROMPT_TEMPLATE_PATH"];

    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Load the template from the first configured path, falling back to the
    /// embedded default when none is set.
    pub fn from_env() -> anyhow::Result<Self> {
        for key in Self::PATH_VARS {
            if let Ok(path) = std::env::var(key) {
                return Self::from_path(Path::new(&path));
            }
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let template = fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt template from {}", path.display()))?;
        Ok(Self::new(template))
    }

    /// Full system instruction for one turn. When the user's name is known it
    /// is woven in; otherwise the model is told to ask for it naturally.
    pub fn system_instruction(&self, user_name: Option<&str>) -> String {
        match user_name {
            Some(name) => format!(
                "{}\n\nThe user's name is {name}. Address them by name when it feels natural.",
                self.template
            ),
            None => format!(
                "{}\n\nYou do not know the user's name yet. Early in the conversation, ask for it in a natural, unforced way.",
                self.template
            ),
        }
    }
}

/// Scan the current message, then prior user turns most-recent-first, for a
/// self-introduction. The most recent match wins.
pub fn extract_user_name<'a, I>(current: &'a str, prior_user_turns: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(name) = name_from_text(current) {
        return Some(name);
    }
    let prior: Vec<&str> = prior_user_turns.into_iter().collect();
    prior.iter().rev().find_map(|text| name_from_text(text))
}

fn name_from_text(text: &str) -> Option<String> {
    // Matching runs over `text` itself: the intro phrases are pure ASCII, so
    // ASCII-case-insensitive comparison is safe and byte offsets stay valid.
    // Lowercasing the whole message first is not, since some characters change
    // byte length under to_lowercase.
    for intro in NAME_INTROS {
        let mut start = 0;
        while start + intro.len() <= text.len() {
            if !text.is_char_boundary(start) {
                start += 1;
                continue;
            }
            let Some(candidate) = text.get(start..start + intro.len()) else {
                start += 1;
                continue;
            };
            if !candidate.eq_ignore_ascii_case(intro) {
                start += 1;
                continue;
            }

            let end = start + intro.len();
            // Require word boundaries so "I'm" inside "whim" never matches.
            let boundary_before = text[..start]
                .chars()
                .next_back()
                .map_or(true, |ch| !ch.is_alphanumeric());
            let boundary_after = text[end..].starts_with(char::is_whitespace);
            if boundary_before && boundary_after {
                if let Some(name) = first_name_token(&text[end..]) {
                    return Some(name);
                }
            }
            start = end;
        }
    }
    None
}

fn first_name_token(tail: &str) -> Option<String> {
    let token = tail
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric());
    if token.is_empty() || token.len() > 30 {
        return None;
    }
    // "I'm not sure" and similar hedges are not introductions.
    const NON_NAMES: &[&str] = &["not", "just", "so", "a", "an", "the", "really", "here"];
    if NON_NAMES.contains(&token.to_lowercase().as_str()) {
        return None;
    }
    Some(token.to_string())
}
