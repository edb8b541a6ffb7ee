//! Filing loop: match every message in the source mailbox against the rule
//! list and apply the first matching rule's actions.

use tracing::{debug, error, info, warn};

use crate::channels::{MailStore, MailStoreConnector};
use crate::error::{Error, Result};
use crate::pipeline::actions::ActionExecutor;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::Message;
use crate::store::RuleStore;

/// State of a filing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilerState {
    Connecting,
    Authenticated,
    MailboxSelected,
    Iterating,
    Expunging,
    Done,
    Failed,
}

impl FilerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: FilerState) -> bool {
        use FilerState::*;

        if target == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Connecting, Authenticated)
                | (Authenticated, MailboxSelected)
                | (MailboxSelected, Iterating)
                | (Iterating, Expunging)
                | (Expunging, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for FilerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::MailboxSelected => "mailbox_selected",
            Self::Iterating => "iterating",
            Self::Expunging => "expunging",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Current state plus every state visited, in order.
#[derive(Debug, Clone)]
struct StateTrack {
    current: FilerState,
    history: Vec<FilerState>,
}

impl StateTrack {
    fn new() -> Self {
        Self {
            current: FilerState::Connecting,
            history: vec![FilerState::Connecting],
        }
    }

    fn transition_to(&mut self, next: FilerState) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Filer state: {} -> {next}", self.current);
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.current = FilerState::Failed;
            self.history.push(FilerState::Failed);
        }
    }
}

/// Counters for one filing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilingSummary {
    /// Messages found in the source mailbox.
    pub total: usize,
    /// Messages that matched a rule.
    pub processed: usize,
    pub unmatched: usize,
    /// Messages that could not be fetched.
    pub skipped: usize,
    /// Individual actions that failed on matched messages.
    pub action_failures: usize,
    /// States visited; empty when the run never connected.
    pub states: Vec<FilerState>,
}

/// Runs the rule list over one mailbox.
pub struct Filer<'a> {
    rule_store: &'a dyn RuleStore,
    executor: ActionExecutor<'a>,
    source_mailbox: String,
}

impl<'a> Filer<'a> {
    pub fn new(rule_store: &'a dyn RuleStore, executor: ActionExecutor<'a>) -> Self {
        Self {
            rule_store,
            executor,
            source_mailbox: "INBOX".to_string(),
        }
    }

    pub fn with_source_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.source_mailbox = mailbox.into();
        self
    }

    /// File every message in the source mailbox.
    ///
    /// Rules are loaded before connecting: with no rules there is nothing to
    /// do and no connection is made.
    pub fn run<C: MailStoreConnector>(&self, connector: &C) -> Result<FilingSummary> {
        let rules = match self.rule_store.load()? {
            Some(rules) if !rules.is_empty() => rules,
            _ => {
                info!("No rules found. Run the trainer first.");
                return Ok(FilingSummary::default());
            }
        };
        let engine = RulesEngine::new(rules);

        let mut summary = FilingSummary::default();
        let mut track = StateTrack::new();
        let result = self.file_all(connector, &engine, &mut track, &mut summary);
        if let Err(e) = result {
            track.fail();
            error!(state = %track.current, mailbox = %self.source_mailbox, "Filing run aborted: {e}");
            return Err(e);
        }

        summary.states = track.history;
        info!(
            "Done. Processed {} of {} messages ({} unmatched, {} skipped).",
            summary.processed, summary.total, summary.unmatched, summary.skipped
        );
        Ok(summary)
    }

    fn file_all<C: MailStoreConnector>(
        &self,
        connector: &C,
        engine: &RulesEngine,
        track: &mut StateTrack,
        summary: &mut FilingSummary,
    ) -> Result<()> {
        let mut session = connector.connect()?;
        track.transition_to(FilerState::Authenticated)?;

        session.select(&self.source_mailbox, false)?;
        track.transition_to(FilerState::MailboxSelected)?;

        let uids = session.search_all()?;
        summary.total = uids.len();
        info!("Found {} messages in {}", uids.len(), self.source_mailbox);
        track.transition_to(FilerState::Iterating)?;

        for uid in uids {
            let raw = match session.fetch_peek(uid) {
                Ok(raw) => raw,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(uid = %uid, "Skipping message: fetch failed: {e}");
                    summary.skipped += 1;
                    continue;
                }
            };

            let mut message = Message::from_raw(uid, raw);
            debug!(
                uid = %uid,
                "Subject: {}",
                message.headers.subject.as_deref().unwrap_or_default()
            );

            let Some(matched) = engine.evaluate(&message.headers) else {
                debug!(uid = %uid, "No rule matched");
                summary.unmatched += 1;
                continue;
            };

            info!(
                "[UID {uid}] Matched rule {}: {} contains '{}'",
                matched.position, matched.rule.matcher.header, matched.rule.matcher.needle
            );
            let report = self
                .executor
                .execute_all(&mut session, &mut message, &matched.rule.actions);
            summary.action_failures += report.failed;
            summary.processed += 1;
        }

        track.transition_to(FilerState::Expunging)?;
        session.expunge()?;
        debug!(mailbox = %self.source_mailbox, "Expunged deleted messages");

        if let Err(e) = session.logout() {
            debug!("Logout failed: {e}");
        }
        track.transition_to(FilerState::Done)?;
        Ok(())
    }
}
