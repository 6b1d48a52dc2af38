//! Placeholder substitution for runner environment templates
//!
//! Templates reference values with `{name}`. Resolution is a pure function of the
//! template and a [`PlaceholderContext`]; unknown placeholders are left verbatim and
//! reported back to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Every placeholder a template may use, with a short description
pub const PLACEHOLDERS: &[(&str, &str)] = &[
    ("scope_name", "Repository (owner/name) or organization the runner serves"),
    ("registration_token", "Short-lived runner registration token"),
    ("runner_name", "Name the runner registers under"),
    ("runner_group", "Runner group, empty when none was requested"),
    ("runner_image", "Container image of the runner"),
    ("repo_owner", "Owner part of scope_name, 'unknown' for organizations"),
    ("repo_name", "Repository part of scope_name"),
    ("repo_full_name", "Same as scope_name"),
    ("timestamp", "Current Unix time in seconds"),
    ("timestamp_iso", "Current time, RFC 3339 (2024-02-03T18:30:34Z)"),
    ("timestamp_date", "Current date, YYYY-MM-DD"),
    ("timestamp_time", "Current time of day, HH-MM-SS"),
    ("hostname", "Host name of the orchestrator"),
    ("orchestrator_id", "Identifier of this orchestrator process"),
];

/// Values placeholders resolve to
#[derive(Clone)]
pub struct PlaceholderContext {
    pub scope_name: String,
    pub registration_token: String,
    pub runner_name: String,
    pub runner_group: Option<String>,
    pub runner_image: String,
    pub hostname: String,
    pub orchestrator_id: String,
    pub now: DateTime<Utc>,
}

impl PlaceholderContext {
    fn values(&self) -> BTreeMap<&'static str, String> {
        let (repo_owner, repo_name) = match self.scope_name.split_once('/') {
            Some((owner, name)) => (owner.to_string(), name.to_string()),
            None => ("unknown".to_string(), self.scope_name.clone()),
        };

        BTreeMap::from([
            ("scope_name", self.scope_name.clone()),
            ("registration_token", self.registration_token.clone()),
            ("runner_name", self.runner_name.clone()),
            ("runner_group", self.runner_group.clone().unwrap_or_default()),
            ("runner_image", self.runner_image.clone()),
            ("repo_owner", repo_owner),
            ("repo_name", repo_name),
            ("repo_full_name", self.scope_name.clone()),
            ("timestamp", self.now.timestamp().to_string()),
            ("timestamp_iso", self.now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("timestamp_date", self.now.format("%Y-%m-%d").to_string()),
            ("timestamp_time", self.now.format("%H-%M-%S").to_string()),
            ("hostname", self.hostname.clone()),
            ("orchestrator_id", self.orchestrator_id.clone()),
        ])
    }
}

/// Result of resolving one template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    /// Placeholder names that were left in place
    pub unresolved: Vec<String>,
}

/// Substitutes every known placeholder of `template`
pub fn resolve(template: &str, ctx: &PlaceholderContext) -> Resolved {
    let values = ctx.values();
    let mut value = String::with_capacity(template.len());
    let mut unresolved = Vec::new();

    for token in tokenize(template) {
        match token {
            Token::Text(text) => value.push_str(text),
            Token::Placeholder(name) => match values.get(name) {
                Some(v) => value.push_str(v),
                None => {
                    value.push('{');
                    value.push_str(name);
                    value.push('}');
                    unresolved.push(name.to_string());
                }
            },
        }
    }

    Resolved { value, unresolved }
}

/// Validation report for one template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateReport {
    pub template: String,
    pub total_placeholders: usize,
    pub valid_placeholders: Vec<String>,
    pub invalid_placeholders: Vec<String>,
    pub is_valid: bool,
}

/// Checks which placeholders of `template` are known
pub fn validate_template(template: &str) -> TemplateReport {
    let mut valid_placeholders = Vec::new();
    let mut invalid_placeholders = Vec::new();

    for token in tokenize(template) {
        if let Token::Placeholder(name) = token {
            if is_known(name) {
                valid_placeholders.push(format!("{{{}}}", name));
            } else {
                invalid_placeholders.push(format!("{{{}}}", name));
            }
        }
    }

    TemplateReport {
        template: template.to_string(),
        total_placeholders: valid_placeholders.len() + invalid_placeholders.len(),
        is_valid: invalid_placeholders.is_empty(),
        valid_placeholders,
        invalid_placeholders,
    }
}

pub fn is_known(name: &str) -> bool {
    PLACEHOLDERS.iter().any(|(known, _)| *known == name)
}

enum Token<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// Splits a template into literal text and `{identifier}` placeholders
///
/// Braces that do not enclose an identifier (`[A-Za-z0-9_]+`) are literal text.
fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}');
        let name = close.map(|c| &after[..c]);

        match name {
            Some(name) if is_identifier(name) => {
                if open > 0 {
                    tokens.push(Token::Text(&rest[..open]));
                }
                tokens.push(Token::Placeholder(name));
                rest = &after[name.len() + 1..];
            }
            _ => {
                tokens.push(Token::Text(&rest[..=open]));
                rest = after;
            }
        }
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }

    tokens
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
