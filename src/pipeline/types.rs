//! Core types: rules, actions, rule sets and messages.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::channels::Uid;

/// Which header (or header combination) a rule inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HeaderField {
    From,
    Subject,
    ListId,
    ListUnsubscribe,
    /// From, Subject and List-Id joined together.
    Any,
    /// A header name this crate does not know how to match. Never matches,
    /// but is kept so the rule file round-trips.
    Other(String),
}

impl HeaderField {
    pub fn as_str(&self) -> &str {
        match self {
            Self::From => "From",
            Self::Subject => "Subject",
            Self::ListId => "List-Id",
            Self::ListUnsubscribe => "List-Unsubscribe",
            Self::Any => "any",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for HeaderField {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "from" => Self::From,
            "subject" => Self::Subject,
            "list-id" => Self::ListId,
            "list-unsubscribe" => Self::ListUnsubscribe,
            "any" => Self::Any,
            _ => Self::Other(value),
        }
    }
}

impl From<HeaderField> for String {
    fn from(value: HeaderField) -> Self {
        match value {
            HeaderField::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a rule's action list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ActionRepr", into = "ActionRepr")]
pub enum Action {
    MarkRead,
    Move { dest: String },
    Forward { to: String },
    Delete,
    /// An action name not understood by this version; executing it is a no-op.
    Unknown { name: String, arg: Option<String> },
    /// An entry that is not an action at all (`[]`, `42`, `[move]`). Kept
    /// verbatim so the rule file round-trips; executing it is a no-op.
    Invalid { raw: Value },
}

impl Action {
    pub fn move_to(dest: impl Into<String>) -> Self {
        Self::Move { dest: dest.into() }
    }

    pub fn forward_to(to: impl Into<String>) -> Self {
        Self::Forward { to: to.into() }
    }

    /// Name used in the rule file and in log lines.
    pub fn name(&self) -> &str {
        match self {
            Self::MarkRead => "mark_read",
            Self::Move { .. } => "move",
            Self::Forward { .. } => "forward",
            Self::Delete => "delete",
            Self::Unknown { name, .. } => name,
            Self::Invalid { .. } => "invalid",
        }
    }

    /// `None` when a known action is missing its argument.
    fn from_parts(name: String, arg: Option<String>) -> Option<Self> {
        let action = match (name.as_str(), arg) {
            ("mark_read", _) => Self::MarkRead,
            ("delete", _) => Self::Delete,
            ("move", Some(dest)) => Self::Move { dest },
            ("forward", Some(to)) => Self::Forward { to },
            ("move" | "forward", None) => return None,
            (_, arg) => Self::Unknown { name, arg },
        };
        Some(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move { dest } => write!(f, "move({dest})"),
            Self::Forward { to } => write!(f, "forward({to})"),
            Self::Unknown { name, arg: Some(arg) } => write!(f, "{name}({arg})"),
            Self::Invalid { raw } => write!(f, "invalid({raw:?})"),
            other => f.write_str(other.name()),
        }
    }
}

/// The shapes an action may take in the rule file: `mark_read`,
/// `{move: Offers}` or `[move, Offers]`. Anything else lands in `Other`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ActionRepr {
    Name(String),
    Pair(Vec<Value>),
    Map(Mapping),
    Other(Value),
}

/// A scalar action argument as text; `None` for null, `Err` for nested values.
fn scalar_arg(value: &Value) -> Result<Option<String>, ()> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(()),
    }
}

impl ActionRepr {
    fn into_raw(self) -> Value {
        match self {
            Self::Name(name) => Value::String(name),
            Self::Pair(items) => Value::Sequence(items),
            Self::Map(map) => Value::Mapping(map),
            Self::Other(value) => value,
        }
    }
}

impl From<ActionRepr> for Action {
    fn from(repr: ActionRepr) -> Self {
        let parts = match &repr {
            ActionRepr::Name(name) => Some((name.clone(), Ok(None))),
            ActionRepr::Pair(items) => items.first().and_then(|name| {
                let arg = items.get(1).map_or(Ok(None), scalar_arg);
                name.as_str().map(|name| (name.to_string(), arg))
            }),
            // Only the first key of a mapping is read.
            ActionRepr::Map(map) => map.iter().next().and_then(|(name, arg)| {
                name.as_str().map(|name| (name.to_string(), scalar_arg(arg)))
            }),
            ActionRepr::Other(_) => None,
        };
        let action = match parts {
            Some((name, Ok(arg))) => Action::from_parts(name, arg),
            _ => None,
        };
        action.unwrap_or_else(|| Action::Invalid {
            raw: repr.into_raw(),
        })
    }
}

impl From<Action> for ActionRepr {
    fn from(action: Action) -> Self {
        let single = |name: &str, arg: String| {
            let mut map = Mapping::new();
            map.insert(Value::String(name.to_string()), Value::String(arg));
            ActionRepr::Map(map)
        };
        match action {
            Action::MarkRead => ActionRepr::Name("mark_read".into()),
            Action::Delete => ActionRepr::Name("delete".into()),
            Action::Move { dest } => single("move", dest),
            Action::Forward { to } => single("forward", to),
            Action::Unknown { name, arg: None } => ActionRepr::Name(name),
            Action::Unknown {
                name,
                arg: Some(arg),
            } => single(&name, arg),
            Action::Invalid { raw } => ActionRepr::Other(raw),
        }
    }
}

/// The predicate half of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    pub header: HeaderField,
    /// Substring searched for, case-insensitively.
    #[serde(rename = "contains")]
    pub needle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(header: HeaderField, needle: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            matcher: MatchSpec {
                header,
                needle: needle.into(),
            },
            actions,
        }
    }

    /// Whether this rule is keyed by `(header, needle)` for upsert purposes.
    /// Needles compare exactly; matching itself is case-insensitive.
    pub fn is_keyed_by(&self, header: &HeaderField, needle: &str) -> bool {
        self.matcher.header == *header && self.matcher.needle == needle
    }
}

/// Outcome of [`RuleSet::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
}

/// Ordered rule list, persisted as a whole. Order is evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Replace the actions of the rule keyed by `(header, needle)`, or append
    /// a new rule at the end. Existing rules are never reordered.
    pub fn upsert(&mut self, header: HeaderField, needle: &str, actions: &[Action]) -> Upsert {
        if let Some(rule) = self
            .rules
            .iter_mut()
            .find(|r| r.is_keyed_by(&header, needle))
        {
            debug!(header = %header, needle = %needle, "Updated existing rule");
            rule.actions = actions.to_vec();
            return Upsert::Updated;
        }

        debug!(header = %header, needle = %needle, "Added new rule");
        self.rules
            .push(Rule::new(header, needle, actions.to_vec()));
        Upsert::Added
    }
}

/// Decoded values of the headers the engine looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    pub from: Option<String>,
    pub subject: Option<String>,
    pub list_id: Option<String>,
    /// Kept undecoded; it only ever carries URIs.
    pub list_unsubscribe: Option<String>,
}

impl Headers {
    /// Header value by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name.to_ascii_lowercase().as_str() {
            "from" => &self.from,
            "subject" => &self.subject,
            "list-id" => &self.list_id,
            "list-unsubscribe" => &self.list_unsubscribe,
            _ => return None,
        };
        value.as_deref()
    }
}

/// A message as seen by the filing and training loops.
#[derive(Debug, Clone)]
pub struct Message {
    pub uid: Uid,
    pub headers: Headers,
    /// Full RFC 5322 source, when already fetched.
    pub raw: Option<Vec<u8>>,
}

impl Message {
    /// Build a message from its full source, decoding the headers.
    pub fn from_raw(uid: Uid, raw: Vec<u8>) -> Self {
        let headers = crate::pipeline::signals::decode_headers(&raw);
        Self {
            uid,
            headers,
            raw: Some(raw),
        }
    }

    /// A message whose body has not been fetched yet.
    pub fn headers_only(uid: Uid, headers: Headers) -> Self {
        Self {
            uid,
            headers,
            raw: None,
        }
    }
}
