//! Rule matching.
//!
//! A rule is a case-insensitive substring test against one header (or the
//! From/Subject/List-Id combination). Rules are evaluated in file order and
//! the first hit wins.

use tracing::{debug, warn};

use crate::pipeline::signals::{list_id_key, list_unsubscribe_domains};
use crate::pipeline::types::{HeaderField, Headers, Rule, RuleSet};

/// Shorten a header value for log lines.
fn preview(value: &str) -> &str {
    match value.char_indices().nth(60) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

fn lowered(value: Option<&String>) -> String {
    value.map(|v| v.to_lowercase()).unwrap_or_default()
}

/// Whether `rule` matches a message with these headers.
pub fn matches(headers: &Headers, rule: &Rule) -> bool {
    let needle = rule.matcher.needle.to_lowercase();

    match &rule.matcher.header {
        HeaderField::ListId => {
            let list_id = list_id_key(headers).unwrap_or_default();
            let result = list_id.contains(&needle);
            debug!("  Checking List-Id: '{needle}' in '{}' → {result}", preview(&list_id));
            result
        }
        HeaderField::ListUnsubscribe => {
            let domains = list_unsubscribe_domains(headers);
            let result = domains.iter().any(|d| d.contains(&needle));
            debug!("  Checking List-Unsubscribe: '{needle}' in {domains:?} → {result}");
            result
        }
        HeaderField::From => {
            let from = lowered(headers.from.as_ref());
            let result = from.contains(&needle);
            debug!("  Checking From: '{needle}' in '{}' → {result}", preview(&from));
            result
        }
        HeaderField::Subject => {
            let subject = lowered(headers.subject.as_ref());
            let result = subject.contains(&needle);
            debug!("  Checking Subject: '{needle}' in '{}' → {result}", preview(&subject));
            result
        }
        HeaderField::Any => {
            let combined = format!(
                "{} {} {}",
                headers.from.as_deref().unwrap_or_default(),
                headers.subject.as_deref().unwrap_or_default(),
                headers.list_id.as_deref().unwrap_or_default(),
            )
            .to_lowercase();
            let result = combined.contains(&needle);
            debug!("  Checking any: '{needle}' in combined headers → {result}");
            result
        }
        HeaderField::Other(name) => {
            warn!(header = %name, "Unknown match header in rule; treating as no match");
            false
        }
    }
}

/// The rule a message was filed by.
#[derive(Debug, Clone, Copy)]
pub struct Matched<'r> {
    /// 1-based position in the rule file.
    pub position: usize,
    pub rule: &'r Rule,
}

/// Ordered rule evaluation, first match wins.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    rules: RuleSet,
}

impl RulesEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the first rule matching `headers`. Later rules are not evaluated.
    pub fn evaluate(&self, headers: &Headers) -> Option<Matched<'_>> {
        self.rules
            .iter()
            .enumerate()
            .find(|(idx, rule)| {
                debug!(
                    "  Trying rule {}: {} contains '{}'",
                    idx + 1,
                    rule.matcher.header,
                    rule.matcher.needle
                );
                matches(headers, rule)
            })
            .map(|(idx, rule)| Matched {
                position: idx + 1,
                rule,
            })
    }
}
