//! Per-connection state machine: read buffer, parse/execute cursor, and
//! outbound write queue, driven by a readiness notifier.
//!
//! One `Connection` owns exactly one socket. It never blocks; every method
//! here is called in response to a single readiness event and returns once
//! the socket would block again (`EAGAIN`/`EWOULDBLOCK`).

use std::collections::VecDeque;
use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::Interest;

use memkv_core::proto::{self, CommandHeader, ParseOutcome};

use crate::executor::CommandExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Open,
    Draining,
}

/// One non-blocking TCP connection and its parse/execute/write state.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnState,

    read_buf: Vec<u8>,
    read_fill: usize,

    partial: Option<CommandHeader>,
    arg_remaining: usize,
    arg_buf: Vec<u8>,

    write_queue: VecDeque<Vec<u8>>,
    cur_offset: usize,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, read_buf_size: usize) -> Self {
        Connection {
            stream,
            peer,
            state: ConnState::Open,
            read_buf: vec![0u8; read_buf_size],
            read_fill: 0,
            partial: None,
            arg_remaining: 0,
            arg_buf: Vec::new(),
            write_queue: VecDeque::new(),
            cur_offset: 0,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Current readiness interest, a pure function of connection state
    /// `None` means the connection has nothing left to do and
    /// should be deregistered and closed.
    pub fn interest(&self) -> Option<Interest> {
        match (self.state, self.write_queue.is_empty()) {
            (ConnState::Open, true) => Some(Interest::READABLE),
            (ConnState::Open, false) => Some(Interest::READABLE | Interest::WRITABLE),
            (ConnState::Draining, false) => Some(Interest::WRITABLE),
            (ConnState::Draining, true) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ConnState::Draining && self.write_queue.is_empty()
    }

    pub fn enter_draining(&mut self) {
        self.state = ConnState::Draining;
    }

    /// Read everything currently available, running the parse/execute
    /// pipeline after every `read()` that returns data, until the socket
    /// would block, closes, or errors.
    pub fn on_readable(&mut self, executor: &dyn CommandExecutor) {
        loop {
            if self.read_fill == self.read_buf.len() {
                self.drain_pipeline(executor);
                if self.read_fill == self.read_buf.len() {
                    // No progress possible: a header line (or payload) that
                    // alone exceeds the read buffer. ClientProtocolError per
                    // report and resynchronize rather than wedging the
                    // connection forever.
                    self.reject_oversized_command();
                    continue;
                }
            }

            match self.stream.read(&mut self.read_buf[self.read_fill..]) {
                Ok(0) => {
                    self.enter_draining();
                    break;
                }
                Ok(n) => {
                    self.read_fill += n;
                    self.drain_pipeline(executor);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "connection read error");
                    self.enter_draining();
                    break;
                }
            }
        }
    }

    /// Run the parse → accumulate-payload → execute pipeline over whatever
    /// is currently in the read buffer, looping while progress is made
    /// pipeline: parse header, accumulate payload, execute, enqueue reply.
    fn drain_pipeline(&mut self, executor: &dyn CommandExecutor) {
        loop {
            let mut progressed = false;

            if self.partial.is_none() {
                match proto::parse(&self.read_buf[..self.read_fill]) {
                    ParseOutcome::Incomplete => break,
                    ParseOutcome::Complete { consumed, header } => {
                        self.shift(consumed);
                        self.arg_remaining =
                            if header.payload_len > 0 { header.payload_len + 2 } else { 0 };
                        self.arg_buf.clear();
                        self.partial = Some(header);
                        progressed = true;
                    }
                    ParseOutcome::Error { consumed, .. } => {
                        self.shift(consumed);
                        self.enqueue(proto::error_reply());
                        progressed = true;
                    }
                }
            }

            if let Some(header) = self.partial.clone() {
                if self.arg_remaining > 0 {
                    let take = self.arg_remaining.min(self.read_fill);
                    if take > 0 {
                        self.arg_buf.extend_from_slice(&self.read_buf[..take]);
                        self.shift(take);
                        self.arg_remaining -= take;
                        progressed = true;
                    }
                }

                if self.arg_remaining == 0 {
                    let payload = if header.payload_len > 0 {
                        &self.arg_buf[..header.payload_len]
                    } else {
                        &[][..]
                    };
                    let reply = executor.execute(&header, payload);
                    self.enqueue(reply);
                    self.partial = None;
                    self.arg_buf.clear();
                    progressed = true;
                }
            }

            if !progressed || self.read_fill == 0 {
                break;
            }
        }
    }

    fn reject_oversized_command(&mut self) {
        tracing::debug!(peer = %self.peer, "oversized command line, resetting parser");
        self.enqueue(proto::error_reply());
        self.read_fill = 0;
        self.partial = None;
        self.arg_remaining = 0;
        self.arg_buf.clear();
    }

    fn enqueue(&mut self, mut reply: Vec<u8>) {
        reply.extend_from_slice(b"\r\n");
        self.write_queue.push_back(reply);
    }

    /// Drop the first `n` bytes of the read buffer, shifting the remainder
    /// (and `read_fill`) down.
    fn shift(&mut self, n: usize) {
        debug_assert!(n <= self.read_fill);
        self.read_buf.copy_within(n..self.read_fill, 0);
        self.read_fill -= n;
    }

    /// Drain the write queue via a single vectored write, honoring
    /// `cur_offset` into the head element.
    pub fn on_writable(&mut self) {
        loop {
            if self.write_queue.is_empty() {
                break;
            }

            let slices: Vec<IoSlice> = self
                .write_queue
                .iter()
                .enumerate()
                .map(|(i, buf)| {
                    let start = if i == 0 { self.cur_offset } else { 0 };
                    IoSlice::new(&buf[start..])
                })
                .collect();

            match self.stream.write_vectored(&slices) {
                Ok(0) => {
                    tracing::debug!(peer = %self.peer, "write returned 0, draining");
                    self.enter_draining();
                    break;
                }
                Ok(mut n) => {
                    while n > 0 {
                        let head_len = self.write_queue.front().expect("queue non-empty").len()
                            - self.cur_offset;
                        if n >= head_len {
                            n -= head_len;
                            self.write_queue.pop_front();
                            self.cur_offset = 0;
                        } else {
                            self.cur_offset += n;
                            n = 0;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "connection write error");
                    self.enter_draining();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{new_store_handle, CommandExecutor as _};
    use std::io::Read as _;
    use std::net::TcpStream as StdTcpStream;

    fn connected_pair() -> (Connection, StdTcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let server = TcpStream::from_std(server);
        (Connection::new(server, peer, 4096), client)
    }

    #[test]
    fn pipelined_get_after_set_in_one_segment() {
        let (mut conn, mut client) = connected_pair();
        let store = new_store_handle(1024);
        client.write_all(b"SET k 1\r\nv\r\nGET k\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.on_readable(&*store);

        let mut buf = Vec::new();
        client.set_nonblocking(true).unwrap();
        conn.on_writable();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let _ = client.read_to_end(&mut buf);
        assert_eq!(buf, b"STORED\r\nVALUE 1\r\nv\r\n".to_vec());
    }

    #[test]
    fn split_payload_across_two_reads() {
        let (mut conn, mut client) = connected_pair();
        let store = new_store_handle(1024);

        client.write_all(b"SET k 1\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.on_readable(&*store);

        client.write_all(b"v\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.on_readable(&*store);

        conn.on_writable();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = Vec::new();
        client.set_nonblocking(true).unwrap();
        let _ = client.read_to_end(&mut buf);
        assert_eq!(buf, b"STORED\r\n".to_vec());
        assert_eq!(store.execute(
            &memkv_core::proto::CommandHeader {
                kind: memkv_core::proto::CommandKind::Get,
                key: (*b"k").into(),
                payload_len: 0,
            },
            b""
        ), b"VALUE 1\r\nv");
    }

    #[test]
    fn unknown_verb_gets_error_reply_and_connection_keeps_serving() {
        let (mut conn, mut client) = connected_pair();
        let store = new_store_handle(1024);
        client.write_all(b"FROB k\r\nGET missing\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.on_readable(&*store);
        conn.on_writable();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut buf = Vec::new();
        client.set_nonblocking(true).unwrap();
        let _ = client.read_to_end(&mut buf);
        assert_eq!(buf, b"ERROR\r\nNOT_FOUND\r\n".to_vec());
    }

    #[test]
    fn peer_close_with_no_pending_writes_enters_draining_and_is_done() {
        let (mut conn, client) = connected_pair();
        let store = new_store_handle(1024);
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(20));
        conn.on_readable(&*store);
        assert!(conn.is_done());
        assert_eq!(conn.interest(), None);
    }
}
