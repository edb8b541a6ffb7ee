//! Rule trainer: learn rules from messages sorted by hand into staging
//! mailboxes, then file those messages with the category's actions.

use tracing::{debug, error, info, warn};

use crate::channels::{MailStore, MailStoreConnector};
use crate::error::Result;
use crate::pipeline::actions::ActionExecutor;
use crate::pipeline::signals::{infer_signal, subject_hint};
use crate::pipeline::types::{Action, HeaderField, Message, RuleSet, Upsert};
use crate::store::RuleStore;

/// A staging mailbox and the actions learned for its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingCategory {
    pub mailbox: String,
    pub actions: Vec<Action>,
    /// Also learn a Subject rule from travel keywords.
    pub subject_hints: bool,
}

impl TrainingCategory {
    pub fn new(mailbox: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            mailbox: mailbox.into(),
            actions,
            subject_hints: false,
        }
    }

    pub fn with_subject_hints(mut self) -> Self {
        self.subject_hints = true;
        self
    }
}

/// Counters for one training run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSummary {
    /// Messages learned from.
    pub trained: usize,
    pub rules_added: usize,
    pub rules_updated: usize,
    /// Staging mailboxes that could not be selected.
    pub skipped_mailboxes: usize,
    pub action_failures: usize,
}

impl TrainingSummary {
    fn record(&mut self, upsert: Upsert) {
        match upsert {
            Upsert::Added => self.rules_added += 1,
            Upsert::Updated => self.rules_updated += 1,
        }
    }

    fn learned_anything(&self) -> bool {
        self.rules_added + self.rules_updated > 0
    }
}

pub struct Trainer<'a> {
    rule_store: &'a dyn RuleStore,
    executor: ActionExecutor<'a>,
    categories: Vec<TrainingCategory>,
}

impl<'a> Trainer<'a> {
    pub fn new(
        rule_store: &'a dyn RuleStore,
        executor: ActionExecutor<'a>,
        categories: Vec<TrainingCategory>,
    ) -> Self {
        Self {
            rule_store,
            executor,
            categories,
        }
    }

    /// Train from every staging mailbox and persist the rule set.
    ///
    /// An unreadable rule file aborts before connecting, so it is never
    /// overwritten. If the connection drops mid-run, rules learned so far are
    /// still saved before the error is returned.
    pub fn run<C: MailStoreConnector>(&self, connector: &C) -> Result<TrainingSummary> {
        let mut rules = self.rule_store.load()?.unwrap_or_default();
        info!("Loaded {} existing rules", rules.len());

        let mut summary = TrainingSummary::default();
        let mut session = match self.train_all(connector, &mut rules, &mut summary) {
            Ok(session) => session,
            Err(e) => {
                error!("Training run aborted: {e}");
                if summary.learned_anything() {
                    match self.rule_store.save(&rules) {
                        Ok(()) => info!("Saved {} rules learned before the failure", rules.len()),
                        Err(save_err) => error!("Could not save learned rules: {save_err}"),
                    }
                }
                return Err(e);
            }
        };

        self.rule_store.save(&rules)?;
        if let Err(e) = session.logout() {
            debug!("Logout failed: {e}");
        }

        info!(
            "Training complete: {} messages, {} rules added, {} updated.",
            summary.trained, summary.rules_added, summary.rules_updated
        );
        Ok(summary)
    }

    fn train_all<C: MailStoreConnector>(
        &self,
        connector: &C,
        rules: &mut RuleSet,
        summary: &mut TrainingSummary,
    ) -> Result<C::Session> {
        let mut session = connector.connect()?;

        for category in &self.categories {
            if let Err(e) = session.select(&category.mailbox, false) {
                if e.is_fatal() {
                    return Err(e.into());
                }
                debug!(mailbox = %category.mailbox, "Skipping training mailbox: {e}");
                summary.skipped_mailboxes += 1;
                continue;
            }
            self.train_mailbox(&mut session, category, rules, summary)?;
        }

        Ok(session)
    }

    fn train_mailbox<S: MailStore>(
        &self,
        session: &mut S,
        category: &TrainingCategory,
        rules: &mut RuleSet,
        summary: &mut TrainingSummary,
    ) -> Result<()> {
        let uids = match session.search_all() {
            Ok(uids) => uids,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(mailbox = %category.mailbox, "Search failed: {e}");
                return Ok(());
            }
        };
        if uids.is_empty() {
            debug!(mailbox = %category.mailbox, "No messages to train from");
            return Ok(());
        }
        info!("Training from {} ({} messages)", category.mailbox, uids.len());

        for uid in uids {
            let raw = match session.fetch_full(uid) {
                Ok(raw) => raw,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(uid = %uid, mailbox = %category.mailbox, "Skipping message: fetch failed: {e}");
                    continue;
                }
            };
            let mut message = Message::from_raw(uid, raw);

            let signal = infer_signal(&message.headers);
            if signal.key.is_empty() {
                // An empty needle would match every message.
                warn!(uid = %uid, "No usable signal in message; not learning a rule");
            } else {
                info!("  [UID {uid}] Learned {} contains '{}'", signal.header, signal.key);
                summary.record(rules.upsert(signal.header, &signal.key, &category.actions));
            }

            if category.subject_hints {
                if let Some(hint) = subject_hint(&message.headers) {
                    info!("  [UID {uid}] Learned Subject contains '{hint}'");
                    summary.record(rules.upsert(HeaderField::Subject, hint, &category.actions));
                }
            }

            let report = self
                .executor
                .execute_all(session, &mut message, &category.actions);
            summary.action_failures += report.failed;
            summary.trained += 1;
        }

        match session.expunge() {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!(mailbox = %category.mailbox, "Expunge failed: {e}");
                Ok(())
            }
        }
    }
}
