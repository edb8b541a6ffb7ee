//! Rule matching and action pipeline.
//!
//! Messages flow through:
//! 1. `signals::decode_headers()` — header decoding and key extraction
//! 2. `RulesEngine::evaluate()` — ordered rules, first match wins
//! 3. `ActionExecutor::execute_all()` — best-effort store/transport actions
//!
//! `Filer` drives this over a mailbox; `Trainer` learns new rules from
//! hand-sorted staging mailboxes.

pub mod actions;
pub mod filer;
pub mod rules;
pub mod signals;
pub mod trainer;
pub mod types;

pub use actions::{ActionExecutor, ActionReport, ForwardTemplate, Outcome};
pub use filer::{Filer, FilerState, FilingSummary};
pub use rules::{Matched, RulesEngine};
pub use trainer::{Trainer, TrainingCategory, TrainingSummary};
pub use types::{Action, HeaderField, Headers, MatchSpec, Message, Rule, RuleSet, Upsert};
