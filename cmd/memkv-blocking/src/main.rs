//! memkv blocking front end.
//!
//! The simplest of the three front ends: no readiness notifier, no
//! non-blocking I/O. One OS thread per connection, blocking reads and
//! writes, exactly the "several network front-ends (blocking, ...)" variety
//! called out as the baseline in the design.
//!
//! Usage:
//!     memkv-blocking [port] [store_max_bytes]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use memkv_core::proto::{self, ParseOutcome};
use memkv_core::LruStore;

type SharedStore = Arc<Mutex<LruStore>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(11311);
    let max_bytes: usize = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(64 * 1024 * 1024);

    let store: SharedStore = Arc::new(Mutex::new(LruStore::new(max_bytes)));

    let listener = TcpListener::bind(("0.0.0.0", port)).expect("bind failed");
    tracing::info!(port, max_bytes, "memkv-blocking listening");

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "accept error");
                continue;
            }
        };
        let store = Arc::clone(&store);
        thread::spawn(move || serve(stream, store));
    }
}

fn serve(stream: TcpStream, store: SharedStore) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = serve_inner(stream, &store) {
        tracing::debug!(?peer, error = %e, "connection ended");
    }
}

/// Reads one header line at a time (terminated by `\r\n`), then the
/// payload bytes plus its trailing `\r\n` if the command carries one, and
/// writes back exactly one reply per command — blocking the whole way,
/// unlike the non-blocking front ends' partial-read pipeline.
fn serve_inner(stream: TcpStream, store: &SharedStore) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(()); // orderly peer close
        }

        match proto::parse(&line) {
            ParseOutcome::Incomplete => {
                // No `\r\n` on this "line" at all (e.g. a truncated final
                // line at EOF); treat it like any other malformed input.
                write_reply(&mut writer, proto::error_reply())?;
            }
            ParseOutcome::Error { .. } => {
                write_reply(&mut writer, proto::error_reply())?;
            }
            ParseOutcome::Complete { header, .. } => {
                let mut payload = vec![0u8; header.payload_len];
                if header.payload_len > 0 {
                    reader.read_exact(&mut payload)?;
                    let mut crlf = [0u8; 2];
                    reader.read_exact(&mut crlf)?;
                }
                let reply = {
                    let mut guard = store.lock().unwrap_or_else(|p| p.into_inner());
                    proto::execute(&mut guard, &header, &payload)
                };
                write_reply(&mut writer, reply)?;
            }
        }
    }
}

fn write_reply(writer: &mut TcpStream, mut reply: Vec<u8>) -> std::io::Result<()> {
    reply.extend_from_slice(b"\r\n");
    writer.write_all(&reply)
}
