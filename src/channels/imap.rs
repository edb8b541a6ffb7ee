//! Blocking IMAP4rev1 session over TLS (rustls).
//!
//! Speaks just enough of the protocol for filing and training: LOGIN,
//! SELECT/EXAMINE, UID SEARCH/FETCH/STORE/COPY, CREATE, APPEND, EXPUNGE and
//! LOGOUT. Server literals (`{n}`) are read as raw bytes so message sources
//! survive untouched.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::channels::{Created, Flag, MailStore, MailStoreConnector, Uid};
use crate::error::StoreError;

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Where and how to log in to the mail store.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Opens TLS sessions for [`ImapConfig`].
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

impl MailStoreConnector for ImapConnector {
    type Session = ImapSession<TlsStream>;

    fn connect(&self) -> Result<Self::Session, StoreError> {
        ImapSession::connect(&self.config)
    }
}

/// The TLS stream a live session runs over.
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
        }
    }
}

/// One untagged response, with any literals it carried.
#[derive(Debug, Default)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Response {
    untagged: Vec<ResponseLine>,
    status: Status,
    text: String,
}

/// Length of a literal announced at the end of `line`, e.g. `BODY[] {512}`.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

/// Split `OK [CODE] text` into a status and the remaining text.
fn parse_status(rest: &str) -> Option<(Status, String)> {
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return None,
    };
    Some((status, text.trim().to_string()))
}

/// Quote a string argument, escaping `\` and `"`. CR and LF cannot appear in
/// a quoted string and are dropped.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\r' | '\n' => {}
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// UIDs from `* SEARCH 1 2 3` responses.
fn parse_search(untagged: &[ResponseLine]) -> Vec<Uid> {
    untagged
        .iter()
        .filter_map(|line| {
            let rest = line.text.strip_prefix("SEARCH")?;
            Some(
                rest.split_whitespace()
                    .filter_map(|n| n.parse().ok())
                    .map(Uid)
                    .collect::<Vec<_>>(),
            )
        })
        .flatten()
        .collect()
}

// ── Session ─────────────────────────────────────────────────────────

/// An authenticated IMAP session over any byte stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl ImapSession<TlsStream> {
    /// Connect over implicit TLS, read the greeting and log in.
    pub fn connect(config: &ImapConfig) -> Result<Self, StoreError> {
        info!("Connecting to {}:{} as {}", config.host, config.port, config.username);

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            StoreError::Connect {
                host: config.host.clone(),
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| StoreError::Tls(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| StoreError::Tls(e.to_string()))?;

        let mut session = Self::new(rustls::StreamOwned::new(conn, tcp));
        session.read_greeting()?;
        session.login(&config.username, &config.password)?;
        info!("Connected and authenticated");
        Ok(session)
    }
}

impl<S: Read + Write> ImapSession<S> {
    /// Wrap an already-open stream. The greeting has not been read yet.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn tag(&mut self) -> String {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    fn read_line(&mut self) -> Result<String, StoreError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(StoreError::Disconnected);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    pub fn read_greeting(&mut self) -> Result<(), StoreError> {
        let greeting = self.read_line()?;
        if greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH") {
            return Ok(());
        }
        if greeting.starts_with("* BYE") {
            return Err(StoreError::Disconnected);
        }
        Err(StoreError::Protocol {
            command: "greeting".into(),
            detail: greeting,
        })
    }

    /// Read untagged lines (and their literals) until the line tagged `tag`.
    fn read_response(&mut self, tag: &str, command: &str) -> Result<Response, StoreError> {
        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();

        loop {
            let line = self.read_line()?;

            if let Some(rest) = line.strip_prefix(&prefix) {
                let (status, text) =
                    parse_status(rest).ok_or_else(|| StoreError::Protocol {
                        command: command.to_string(),
                        detail: line.clone(),
                    })?;
                return Ok(Response {
                    untagged,
                    status,
                    text,
                });
            }

            let mut entry = ResponseLine {
                text: line.strip_prefix("* ").unwrap_or(&line).to_string(),
                literals: Vec::new(),
            };
            let mut tail = line;
            while let Some(len) = literal_len(&tail) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                entry.literals.push(literal);
                tail = self.read_line()?;
                entry.text.push_str(&tail);
            }
            untagged.push(entry);
        }
    }

    /// Send `command` and wait for its tagged completion.
    fn execute(&mut self, command: &str) -> Result<Response, StoreError> {
        let tag = self.tag();
        let name = command.split(' ').take(2).collect::<Vec<_>>().join(" ");
        debug!(tag = %tag, command = %name, "IMAP command");
        self.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        self.read_response(&tag, &name)
    }

    /// Like [`execute`](Self::execute) but anything other than OK is an error.
    fn execute_ok(&mut self, command: &str) -> Result<Response, StoreError> {
        let response = self.execute(command)?;
        if response.status != Status::Ok {
            return Err(rejected(command, &response));
        }
        Ok(response)
    }

    fn login(&mut self, user: &str, password: &SecretString) -> Result<(), StoreError> {
        let command = format!("LOGIN {} {}", quote(user), quote(password.expose_secret()));
        let response = self.execute(&command)?;
        if response.status != Status::Ok {
            return Err(StoreError::AuthFailed {
                user: user.to_string(),
                reason: response.text,
            });
        }
        Ok(())
    }

    fn fetch_literal(&mut self, uid: Uid, item: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.execute_ok(&format!("UID FETCH {uid} ({item})"))?;
        response
            .untagged
            .into_iter()
            .filter(|line| line.text.contains("FETCH"))
            .find_map(|line| line.literals.into_iter().next())
            .ok_or_else(|| StoreError::Protocol {
                command: "UID FETCH".into(),
                detail: format!("no message body returned for UID {uid}"),
            })
    }
}

fn rejected(command: &str, response: &Response) -> StoreError {
    StoreError::Rejected {
        command: command.split(' ').take(2).collect::<Vec<_>>().join(" "),
        status: response.status.as_str().to_string(),
        text: response.text.clone(),
    }
}

impl<S: Read + Write> MailStore for ImapSession<S> {
    fn select(&mut self, mailbox: &str, read_only: bool) -> Result<(), StoreError> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        self.execute_ok(&format!("{verb} {}", quote(mailbox)))?;
        Ok(())
    }

    fn search_all(&mut self) -> Result<Vec<Uid>, StoreError> {
        let response = self.execute_ok("UID SEARCH ALL")?;
        Ok(parse_search(&response.untagged))
    }

    fn fetch_peek(&mut self, uid: Uid) -> Result<Vec<u8>, StoreError> {
        self.fetch_literal(uid, "BODY.PEEK[]")
    }

    fn fetch_full(&mut self, uid: Uid) -> Result<Vec<u8>, StoreError> {
        self.fetch_literal(uid, "RFC822")
    }

    fn add_flag(&mut self, uid: Uid, flag: Flag) -> Result<(), StoreError> {
        self.execute_ok(&format!("UID STORE {uid} +FLAGS.SILENT ({flag})"))?;
        Ok(())
    }

    fn create_mailbox(&mut self, mailbox: &str) -> Result<Created, StoreError> {
        let command = format!("CREATE {}", quote(mailbox));
        let response = self.execute(&command)?;
        match response.status {
            Status::Ok => Ok(Created::New),
            Status::No if response.text.to_ascii_lowercase().contains("exists") => {
                Ok(Created::AlreadyExists)
            }
            _ => Err(rejected(&command, &response)),
        }
    }

    fn copy(&mut self, uid: Uid, dest: &str) -> Result<(), StoreError> {
        self.execute_ok(&format!("UID COPY {uid} {}", quote(dest)))?;
        Ok(())
    }

    fn append(&mut self, dest: &str, message: &[u8]) -> Result<(), StoreError> {
        let tag = self.tag();
        debug!(tag = %tag, mailbox = %dest, bytes = message.len(), "IMAP APPEND");
        self.write_all(format!("{tag} APPEND {} {{{}}}\r\n", quote(dest), message.len()).as_bytes())?;

        // Wait for the continuation request; a tagged reply here is a refusal.
        loop {
            let line = self.read_line()?;
            if line.starts_with('+') {
                break;
            }
            if let Some(rest) = line.strip_prefix(&format!("{tag} ")) {
                let (status, text) = parse_status(rest).unwrap_or((Status::Bad, line.clone()));
                return Err(StoreError::Rejected {
                    command: "APPEND".into(),
                    status: status.as_str().to_string(),
                    text,
                });
            }
        }

        let mut payload = Vec::with_capacity(message.len() + 2);
        payload.extend_from_slice(message);
        payload.extend_from_slice(b"\r\n");
        self.write_all(&payload)?;

        let response = self.read_response(&tag, "APPEND")?;
        if response.status != Status::Ok {
            return Err(rejected("APPEND", &response));
        }
        Ok(())
    }

    fn expunge(&mut self) -> Result<(), StoreError> {
        self.execute_ok("EXPUNGE")?;
        Ok(())
    }

    fn logout(&mut self) -> Result<(), StoreError> {
        match self.execute("LOGOUT") {
            Ok(_) | Err(StoreError::Disconnected) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
