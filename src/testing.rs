//! In-memory collaborators for unit tests.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::channels::{Created, Flag, MailStore, MailStoreConnector, OutboundTransport, Uid};
use crate::error::{RulesError, SendError, StoreError};
use crate::pipeline::types::RuleSet;
use crate::store::RuleStore;

// ── Logs ────────────────────────────────────────────────────────────

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` under a debug-level subscriber and return what it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = Arc::clone(&buffer);
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || CaptureWriter(Arc::clone(&writer)))
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.lock().unwrap()).to_string();
    (result, logs)
}

// ── Mail store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Select(String),
    SearchAll,
    FetchPeek(Uid),
    FetchFull(Uid),
    AddFlag(Uid, Flag),
    Create(String),
    Copy(Uid, String),
    Append(String),
    Expunge,
    Logout,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: Uid,
    pub raw: Vec<u8>,
    pub flags: HashSet<Flag>,
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub mailboxes: BTreeMap<String, Vec<StoredMessage>>,
    pub selected: Option<String>,
    pub ops: Vec<Op>,
    pub connects: usize,
    pub fail_connect: bool,
    pub fail_append: bool,
    pub fail_copy: bool,
    pub fail_create: bool,
    pub fail_fetch: HashSet<Uid>,
    pub disconnect_on_fetch: Option<Uid>,
    next_uid: u32,
}

fn rejected(command: &str, text: &str) -> StoreError {
    StoreError::Rejected {
        command: command.into(),
        status: "NO".into(),
        text: text.into(),
    }
}

/// A mail store held in memory. Clones share state, so a test can keep one
/// handle while the code under test "connects" to another.
#[derive(Debug, Clone, Default)]
pub struct FakeStore(Rc<RefCell<StoreState>>);

impl FakeStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.create_box("INBOX");
        store
    }

    pub fn create_box(&self, mailbox: &str) {
        self.0
            .borrow_mut()
            .mailboxes
            .entry(mailbox.to_string())
            .or_default();
    }

    /// Deliver a message and return its UID.
    pub fn deliver(&self, mailbox: &str, raw: &str) -> Uid {
        let mut state = self.0.borrow_mut();
        state.next_uid += 1;
        let uid = Uid(state.next_uid);
        state
            .mailboxes
            .entry(mailbox.to_string())
            .or_default()
            .push(StoredMessage {
                uid,
                raw: raw.as_bytes().to_vec(),
                flags: HashSet::new(),
            });
        uid
    }

    pub fn state(&self) -> Ref<'_, StoreState> {
        self.0.borrow()
    }

    pub fn configure(&self, f: impl FnOnce(&mut StoreState)) {
        f(&mut self.0.borrow_mut());
    }

    pub fn ops(&self) -> Vec<Op> {
        self.0.borrow().ops.clone()
    }

    pub fn messages(&self, mailbox: &str) -> Vec<StoredMessage> {
        self.0
            .borrow()
            .mailboxes
            .get(mailbox)
            .cloned()
            .unwrap_or_default()
    }

    pub fn flags(&self, mailbox: &str, uid: Uid) -> HashSet<Flag> {
        self.messages(mailbox)
            .into_iter()
            .find(|m| m.uid == uid)
            .map(|m| m.flags)
            .unwrap_or_default()
    }

    fn selected_message<T>(
        &self,
        uid: Uid,
        command: &str,
        f: impl FnOnce(&mut StoredMessage) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.0.borrow_mut();
        let selected = state
            .selected
            .clone()
            .ok_or_else(|| rejected(command, "no mailbox selected"))?;
        state
            .mailboxes
            .get_mut(&selected)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.uid == uid))
            .map(f)
            .ok_or_else(|| rejected(command, "no such message"))
    }

    fn fetch(&self, uid: Uid, mark_seen: bool) -> Result<Vec<u8>, StoreError> {
        {
            let state = self.0.borrow();
            if state.disconnect_on_fetch == Some(uid) {
                return Err(StoreError::Disconnected);
            }
            if state.fail_fetch.contains(&uid) {
                return Err(rejected("UID FETCH", "message unavailable"));
            }
        }
        self.selected_message(uid, "UID FETCH", |m| {
            if mark_seen {
                m.flags.insert(Flag::Seen);
            }
            m.raw.clone()
        })
    }
}

impl MailStore for FakeStore {
    fn select(&mut self, mailbox: &str, _read_only: bool) -> Result<(), StoreError> {
        let mut state = self.0.borrow_mut();
        state.ops.push(Op::Select(mailbox.into()));
        if !state.mailboxes.contains_key(mailbox) {
            return Err(rejected("SELECT", "no such mailbox"));
        }
        state.selected = Some(mailbox.into());
        Ok(())
    }

    fn search_all(&mut self) -> Result<Vec<Uid>, StoreError> {
        let mut state = self.0.borrow_mut();
        state.ops.push(Op::SearchAll);
        let selected = state.selected.clone().unwrap_or_default();
        Ok(state
            .mailboxes
            .get(&selected)
            .map(|msgs| msgs.iter().map(|m| m.uid).collect())
            .unwrap_or_default())
    }

    fn fetch_peek(&mut self, uid: Uid) -> Result<Vec<u8>, StoreError> {
        self.0.borrow_mut().ops.push(Op::FetchPeek(uid));
        self.fetch(uid, false)
    }

    fn fetch_full(&mut self, uid: Uid) -> Result<Vec<u8>, StoreError> {
        self.0.borrow_mut().ops.push(Op::FetchFull(uid));
        self.fetch(uid, true)
    }

    fn add_flag(&mut self, uid: Uid, flag: Flag) -> Result<(), StoreError> {
        self.0.borrow_mut().ops.push(Op::AddFlag(uid, flag));
        self.selected_message(uid, "UID STORE", |m| {
            m.flags.insert(flag);
        })
    }

    fn create_mailbox(&mut self, mailbox: &str) -> Result<Created, StoreError> {
        let mut state = self.0.borrow_mut();
        state.ops.push(Op::Create(mailbox.into()));
        if state.fail_create {
            return Err(rejected("CREATE", "permission denied"));
        }
        if state.mailboxes.contains_key(mailbox) {
            return Ok(Created::AlreadyExists);
        }
        state.mailboxes.insert(mailbox.into(), Vec::new());
        Ok(Created::New)
    }

    fn copy(&mut self, uid: Uid, dest: &str) -> Result<(), StoreError> {
        self.0.borrow_mut().ops.push(Op::Copy(uid, dest.into()));
        if self.0.borrow().fail_copy {
            return Err(rejected("UID COPY", "copy refused"));
        }
        let copied = self.selected_message(uid, "UID COPY", |m| m.clone())?;
        let mut state = self.0.borrow_mut();
        state.next_uid += 1;
        let new_uid = Uid(state.next_uid);
        state
            .mailboxes
            .get_mut(dest)
            .ok_or_else(|| rejected("UID COPY", "no such mailbox"))?
            .push(StoredMessage {
                uid: new_uid,
                ..copied
            });
        Ok(())
    }

    fn append(&mut self, dest: &str, message: &[u8]) -> Result<(), StoreError> {
        let mut state = self.0.borrow_mut();
        state.ops.push(Op::Append(dest.into()));
        if state.fail_append {
            return Err(rejected("APPEND", "append refused"));
        }
        state.next_uid += 1;
        let uid = Uid(state.next_uid);
        state
            .mailboxes
            .get_mut(dest)
            .ok_or_else(|| rejected("APPEND", "no such mailbox"))?
            .push(StoredMessage {
                uid,
                raw: message.to_vec(),
                flags: HashSet::new(),
            });
        Ok(())
    }

    fn expunge(&mut self) -> Result<(), StoreError> {
        let mut state = self.0.borrow_mut();
        state.ops.push(Op::Expunge);
        let selected = state.selected.clone().unwrap_or_default();
        if let Some(msgs) = state.mailboxes.get_mut(&selected) {
            msgs.retain(|m| !m.flags.contains(&Flag::Deleted));
        }
        Ok(())
    }

    fn logout(&mut self) -> Result<(), StoreError> {
        self.0.borrow_mut().ops.push(Op::Logout);
        Ok(())
    }
}

impl MailStoreConnector for FakeStore {
    type Session = FakeStore;

    fn connect(&self) -> Result<Self::Session, StoreError> {
        let mut state = self.0.borrow_mut();
        state.connects += 1;
        if state.fail_connect {
            return Err(StoreError::AuthFailed {
                user: "test".into(),
                reason: "invalid credentials".into(),
            });
        }
        Ok(self.clone())
    }
}

// ── Outbound transport ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentForward {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Vec<u8>,
    pub attachment_name: String,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    pub sent: RefCell<Vec<SentForward>>,
    pub fail: Cell<bool>,
}

impl OutboundTransport for FakeTransport {
    fn send_with_attachment(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        attachment: &[u8],
        attachment_name: &str,
    ) -> Result<(), SendError> {
        if self.fail.get() {
            return Err(SendError::Send("connection refused".into()));
        }
        self.sent.borrow_mut().push(SentForward {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            attachment: attachment.to_vec(),
            attachment_name: attachment_name.into(),
        });
        Ok(())
    }
}

// ── Rule store ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    pub rules: RefCell<Option<RuleSet>>,
    pub corrupt: Cell<bool>,
    pub saves: Cell<usize>,
}

impl MemoryRuleStore {
    pub fn with_rules(rules: RuleSet) -> Self {
        Self {
            rules: RefCell::new(Some(rules)),
            ..Default::default()
        }
    }

    pub fn current(&self) -> RuleSet {
        self.rules.borrow().clone().unwrap_or_default()
    }
}

impl RuleStore for MemoryRuleStore {
    fn load(&self) -> Result<Option<RuleSet>, RulesError> {
        if self.corrupt.get() {
            let source = serde_yaml::from_str::<RuleSet>("rules: [unterminated").unwrap_err();
            return Err(RulesError::Parse {
                path: "memory".into(),
                source,
            });
        }
        Ok(self.rules.borrow().clone())
    }

    fn save(&self, rules: &RuleSet) -> Result<(), RulesError> {
        self.saves.set(self.saves.get() + 1);
        *self.rules.borrow_mut() = Some(rules.clone());
        Ok(())
    }
}

/// A small RFC 5322 message with the given extra header lines.
pub fn message(headers: &[&str]) -> String {
    let mut raw = String::from("Message-ID: <test@example.com>\r\n");
    for header in headers {
        raw.push_str(header);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\nHello.\r\n");
    raw
}
