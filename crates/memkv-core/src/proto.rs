//! Line protocol: parsing, command dispatch, and reply encoding.
//!
//! A command is `NAME [args] [payload_length]\r\n`, optionally followed by
//! `payload_length` bytes and a trailing `\r\n`. This module is the
//! CommandParser/Command contract the connection state machine drives; it
//! touches no socket and holds no state across calls beyond what the caller
//! passes in — the connection owns the cursor (`arg_remaining`, the
//! argument accumulator).

use crate::store::LruStore;

/// What kind of command a parsed header names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Put,
    PutIfAbsent,
    Set,
    Delete,
    Get,
}

/// A fully parsed command line, before its payload (if any) has arrived.
#[derive(Debug, Clone)]
pub struct CommandHeader {
    pub kind: CommandKind,
    pub key: Box<[u8]>,
    /// Bytes of payload this command expects, 0 for payload-less commands
    /// (`DELETE`, `GET`). Does not include the trailing `\r\n` after the
    /// payload — the connection adds 2 for that itself while accumulating
    /// the argument bytes.
    pub payload_len: usize,
}

/// A command bound to its header — the unit [`execute`] consumes.
pub type Command = CommandHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// Unrecognized command name or malformed fields on an otherwise
    /// complete line.
    Malformed,
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::Malformed => write!(f, "malformed command"),
        }
    }
}

impl std::error::Error for ProtoError {}

/// Result of one parse attempt over `buf[0..len]`.
pub enum ParseOutcome {
    /// No complete line yet; the caller should wait for more bytes.
    /// Consumed 0.
    Incomplete,
    /// A header was recognized. `consumed` bytes (including the header's
    /// own `\r\n`) should be dropped from the front of the buffer.
    Complete { consumed: usize, header: CommandHeader },
    /// A complete line was present but did not parse as a known command.
    /// `consumed` bytes (the whole bad line, including its `\r\n`) should
    /// still be dropped so the connection can resynchronize on the next
    /// line.
    Error { consumed: usize, err: ProtoError },
}

/// Scan `buf` for one complete command line and parse it.
///
/// Pure function: no state survives between calls except what's encoded in
/// `buf` itself. Returns `Incomplete` if no `\r\n` is present yet.
pub fn parse(buf: &[u8]) -> ParseOutcome {
    let Some(eol) = find_crlf(buf) else {
        return ParseOutcome::Incomplete;
    };
    let consumed = eol + 2;
    let line = &buf[..eol];

    let mut fields = line.split(|&b| b == b' ').filter(|f| !f.is_empty());
    let Some(verb) = fields.next() else {
        return ParseOutcome::Error { consumed, err: ProtoError::Malformed };
    };

    let result = match_verb(verb, &mut fields);
    match result {
        Some(header) => ParseOutcome::Complete { consumed, header },
        None => ParseOutcome::Error { consumed, err: ProtoError::Malformed },
    }
}

fn match_verb<'a>(
    verb: &[u8],
    fields: &mut impl Iterator<Item = &'a [u8]>,
) -> Option<CommandHeader> {
    let eq_ignore_ascii_case = |a: &[u8], b: &str| a.eq_ignore_ascii_case(b.as_bytes());

    if eq_ignore_ascii_case(verb, "PUT") {
        let key = fields.next()?;
        let len = parse_len(fields.next()?)?;
        Some(CommandHeader { kind: CommandKind::Put, key: key.into(), payload_len: len })
    } else if eq_ignore_ascii_case(verb, "PUTIFABSENT") {
        let key = fields.next()?;
        let len = parse_len(fields.next()?)?;
        Some(CommandHeader { kind: CommandKind::PutIfAbsent, key: key.into(), payload_len: len })
    } else if eq_ignore_ascii_case(verb, "SET") {
        let key = fields.next()?;
        let len = parse_len(fields.next()?)?;
        Some(CommandHeader { kind: CommandKind::Set, key: key.into(), payload_len: len })
    } else if eq_ignore_ascii_case(verb, "DELETE") {
        let key = fields.next()?;
        Some(CommandHeader { kind: CommandKind::Delete, key: key.into(), payload_len: 0 })
    } else if eq_ignore_ascii_case(verb, "GET") {
        let key = fields.next()?;
        Some(CommandHeader { kind: CommandKind::Get, key: key.into(), payload_len: 0 })
    } else {
        None
    }
}

fn parse_len(field: &[u8]) -> Option<usize> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Execute a parsed command against `store`, given its accumulated
/// `payload` bytes (empty for payload-less commands). Returns the reply
/// body — without the trailing `\r\n` the connection appends.
pub fn execute(store: &mut LruStore, header: &CommandHeader, payload: &[u8]) -> Vec<u8> {
    match header.kind {
        CommandKind::Put => {
            if store.put(&header.key, payload) {
                b"OK".to_vec()
            } else {
                b"TOO_LARGE".to_vec()
            }
        }
        CommandKind::PutIfAbsent => {
            if store.put_if_absent(&header.key, payload) {
                b"STORED".to_vec()
            } else {
                b"NOT_STORED".to_vec()
            }
        }
        CommandKind::Set => {
            if store.set(&header.key, payload) {
                b"STORED".to_vec()
            } else {
                b"NOT_FOUND".to_vec()
            }
        }
        CommandKind::Delete => {
            if store.delete(&header.key) {
                b"DELETED".to_vec()
            } else {
                b"NOT_FOUND".to_vec()
            }
        }
        CommandKind::Get => match store.get(&header.key) {
            Some(value) => {
                let mut reply = format!("VALUE {}\r\n", value.len()).into_bytes();
                reply.extend_from_slice(&value);
                reply
            }
            None => b"NOT_FOUND".to_vec(),
        },
    }
}

/// Reply for a line that failed to parse: reset and keep serving.
pub fn error_reply() -> Vec<u8> {
    b"ERROR".to_vec()
}
