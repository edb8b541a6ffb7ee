//! Action execution against a single message.
//!
//! Every action is best-effort: [`ActionExecutor::execute_all`] logs a failed
//! action and carries on with the rest of the list.

use tracing::{debug, error, info, warn};

use crate::channels::{Created, Flag, MailStore, OutboundTransport};
use crate::error::ActionError;
use crate::pipeline::types::{Action, Message};

/// Fixed content of the forward wrapper message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTemplate {
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
}

impl Default for ForwardTemplate {
    fn default() -> Self {
        Self {
            subject: "Fwd: travel docs".into(),
            body: "Forwarded itinerary/booking.".into(),
            attachment_name: "message.eml".into(),
        }
    }
}

/// What happened to one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Not understood; nothing was done.
    Skipped,
}

/// Tally of an action list run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Applies actions to messages in the selected mailbox.
pub struct ActionExecutor<'t> {
    transport: &'t dyn OutboundTransport,
    template: ForwardTemplate,
}

impl<'t> ActionExecutor<'t> {
    pub fn new(transport: &'t dyn OutboundTransport) -> Self {
        Self {
            transport,
            template: ForwardTemplate::default(),
        }
    }

    pub fn with_template(mut self, template: ForwardTemplate) -> Self {
        self.template = template;
        self
    }

    /// Run one action.
    pub fn execute<S: MailStore + ?Sized>(
        &self,
        store: &mut S,
        message: &mut Message,
        action: &Action,
    ) -> Result<Outcome, ActionError> {
        let uid = message.uid;
        match action {
            Action::MarkRead => {
                store.add_flag(uid, Flag::Seen)?;
                info!("  [UID {uid}] Marked as read");
            }
            Action::Move { dest } => self.move_message(store, message, dest)?,
            Action::Forward { to } => self.forward(store, message, to)?,
            Action::Delete => {
                store.add_flag(uid, Flag::Deleted)?;
                info!("  [UID {uid}] Marked for deletion");
            }
            Action::Unknown { name, .. } => {
                warn!("  [UID {uid}] Unknown action: {name}");
                return Ok(Outcome::Skipped);
            }
            Action::Invalid { raw } => {
                warn!("  [UID {uid}] Unknown action shape: {raw:?}");
                return Ok(Outcome::Skipped);
            }
        }
        Ok(Outcome::Done)
    }

    /// Run an action list in order. A failing action is logged and does not
    /// stop the actions after it.
    pub fn execute_all<S: MailStore + ?Sized>(
        &self,
        store: &mut S,
        message: &mut Message,
        actions: &[Action],
    ) -> ActionReport {
        let mut report = ActionReport::default();
        for action in actions {
            match self.execute(store, message, action) {
                Ok(Outcome::Done) => report.succeeded += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        uid = %message.uid,
                        action = %action.name(),
                        "  [UID {}] Error performing action '{}': {e}",
                        message.uid,
                        action.name()
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Append a pristine copy (falling back to COPY), then flag the original
    /// deleted. If neither copy path works the original is left alone.
    fn move_message<S: MailStore + ?Sized>(
        &self,
        store: &mut S,
        message: &Message,
        dest: &str,
    ) -> Result<(), ActionError> {
        let uid = message.uid;
        ensure_mailbox(store, dest);

        // APPEND without flags keeps the new copy unread; some servers mark
        // COPY results \Seen.
        let appended = match message.raw.as_deref() {
            Some(raw) => store.append(dest, raw).map_err(|e| e.to_string()),
            None => Err("raw message not available".to_string()),
        };

        match appended {
            Ok(()) => info!("  [UID {uid}] Appended to {dest} (kept unread)"),
            Err(append) => {
                debug!("APPEND to {dest} failed: {append}; falling back to COPY");
                if let Err(copy) = store.copy(uid, dest) {
                    return Err(ActionError::MoveFailed {
                        dest: dest.to_string(),
                        append,
                        copy: copy.to_string(),
                    });
                }
                info!("  [UID {uid}] Copied to {dest}");
            }
        }

        store.add_flag(uid, Flag::Deleted)?;
        Ok(())
    }

    fn forward<S: MailStore + ?Sized>(
        &self,
        store: &mut S,
        message: &mut Message,
        to: &str,
    ) -> Result<(), ActionError> {
        if message.raw.is_none() {
            message.raw = Some(store.fetch_peek(message.uid)?);
        }
        let raw = message.raw.as_deref().unwrap_or_default();

        self.transport.send_with_attachment(
            to,
            &self.template.subject,
            &self.template.body,
            raw,
            &self.template.attachment_name,
        )?;
        info!("  [UID {}] Forwarded to {to}", message.uid);
        Ok(())
    }
}

/// Create `name`; an existing mailbox is fine, and a failed create is only
/// logged since the following APPEND/COPY reports the real problem.
fn ensure_mailbox<S: MailStore + ?Sized>(store: &mut S, name: &str) {
    match store.create_mailbox(name) {
        Ok(Created::New) => debug!("Created mailbox: {name}"),
        Ok(Created::AlreadyExists) => debug!("Mailbox {name} already exists"),
        Err(e) => debug!("Mailbox {name} creation info: {e}"),
    }
}
