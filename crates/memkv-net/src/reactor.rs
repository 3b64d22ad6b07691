//! Reactor loops built on `mio`'s readiness-based `Poll`.
//!
//! Two shapes are provided, both built from the same [`Connection`] state
//! machine:
//!
//! - [`run_listener_loop`]: one thread owns one listening socket and a
//!   [`Slab`] of every connection it has accepted. Used directly by the
//!   single-threaded front end, and once per acceptor thread by the
//!   multi-threaded front end's listener side (each bound with
//!   `SO_REUSEPORT`).
//! - [`run_single_connection`]: one already-accepted connection gets its own
//!   private `Poll` with a single registration. This is what the
//!   multi-threaded front end submits as a task to its [`memkv_pool`]
//!   elastic pool — one task per connection, for that connection's whole
//!   lifetime, so the pool's thread count tracks concurrent connections
//!   rather than per-event callbacks.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::connection::Connection;
use crate::executor::StoreHandle;

const LISTENER_TOKEN: Token = Token(usize::MAX);
const SOLO_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Accept connections on `listener` and service them all on this thread
/// until `stop` is set. Used by the single-threaded front end as its only
/// reactor, and by the multi-threaded front end's acceptor threads.
pub fn run_listener_loop(
    mut listener: TcpListener,
    store: StoreHandle,
    read_buf_size: usize,
    stop: &AtomicBool,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(256);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: Slab<Connection> = Slab::new();

    while !stop.load(Ordering::Relaxed) {
        match poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            if event.token() == LISTENER_TOKEN {
                accept_all(&listener, &mut poll, &mut connections, read_buf_size)?;
                continue;
            }

            let idx = event.token().0;
            if !connections.contains(idx) {
                continue;
            }

            if event.is_readable() {
                let conn = &mut connections[idx];
                conn.on_readable(&*store);
            }
            if connections.contains(idx) && event.is_writable() {
                let conn = &mut connections[idx];
                conn.on_writable();
            }
            if connections.contains(idx) && (event.is_error() || event.is_read_closed()) {
                connections[idx].enter_draining();
            }

            reconcile_interest(&mut poll, &mut connections, idx);
        }
    }

    for (_, mut conn) in connections.drain() {
        let _ = poll.registry().deregister(conn.stream_mut());
    }
    let _ = poll.registry().deregister(&mut listener);
    Ok(())
}

/// Accept-only reactor loop: no [`Slab`], no [`Connection`] state at all.
/// Every accepted socket is handed to `on_accept` and forgotten. This is
/// what the multi-threaded front end runs on each of its acceptor threads —
/// `on_accept` submits a [`run_single_connection`] task to the elastic pool
/// rather than owning the connection itself.
pub fn run_acceptor_loop(
    mut listener: TcpListener,
    stop: &AtomicBool,
    mut on_accept: impl FnMut(TcpStream, SocketAddr),
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(64);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    while !stop.load(Ordering::Relaxed) {
        match poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            if event.token() != LISTENER_TOKEN {
                continue;
            }
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => on_accept(stream, peer),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept error");
                        break;
                    }
                }
            }
        }
    }

    let _ = poll.registry().deregister(&mut listener);
    Ok(())
}

fn accept_all(
    listener: &TcpListener,
    poll: &mut Poll,
    connections: &mut Slab<Connection>,
    read_buf_size: usize,
) -> io::Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                register_new_connection(poll, connections, stream, peer, read_buf_size)?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "accept error");
                return Ok(());
            }
        }
    }
}

fn register_new_connection(
    poll: &mut Poll,
    connections: &mut Slab<Connection>,
    stream: TcpStream,
    peer: SocketAddr,
    read_buf_size: usize,
) -> io::Result<()> {
    let conn = Connection::new(stream, peer, read_buf_size);
    let idx = connections.insert(conn);
    let token = Token(idx);
    let interest = connections[idx].interest().unwrap_or(Interest::READABLE);
    poll.registry()
        .register(connections[idx].stream_mut(), token, interest)?;
    tracing::debug!(conn_id = idx, peer = %peer, "accepted connection");
    Ok(())
}

/// After handling events for `idx`, either update its registration to match
/// its current interest, or — if it has nothing left to do — deregister and
/// drop it (`Draining` with an empty write queue means the connection is
/// closed).
fn reconcile_interest(poll: &mut Poll, connections: &mut Slab<Connection>, idx: usize) {
    if !connections.contains(idx) {
        return;
    }
    if connections[idx].is_done() {
        let mut conn = connections.remove(idx);
        let _ = poll.registry().deregister(conn.stream_mut());
        tracing::debug!(conn_id = idx, "connection closed");
        return;
    }
    if let Some(interest) = connections[idx].interest() {
        let token = Token(idx);
        let _ = poll
            .registry()
            .reregister(connections[idx].stream_mut(), token, interest);
    }
}

/// Run one already-accepted, non-blocking `stream` to completion on a
/// private `Poll`. This is the task body the multi-threaded front end
/// submits to its elastic pool: one call per connection, returning once the
/// connection reaches `Closed`.
pub fn run_single_connection(stream: TcpStream, peer: SocketAddr, store: StoreHandle, read_buf_size: usize) {
    if let Err(e) = run_single_connection_inner(stream, peer, store, read_buf_size) {
        tracing::debug!(peer = %peer, error = %e, "connection task ended with an I/O error");
    }
}

fn run_single_connection_inner(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: StoreHandle,
    read_buf_size: usize,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(4);
    poll.registry()
        .register(&mut stream, SOLO_TOKEN, Interest::READABLE)?;

    let mut conn = Connection::new(stream, peer, read_buf_size);

    loop {
        poll.poll(&mut events, None)?;
        for event in events.iter() {
            if event.is_readable() {
                conn.on_readable(&*store);
            }
            if !conn.is_done() && event.is_writable() {
                conn.on_writable();
            }
            if !conn.is_done() && (event.is_error() || event.is_read_closed()) {
                conn.enter_draining();
            }
        }

        if conn.is_done() {
            break;
        }
        if let Some(interest) = conn.interest() {
            poll.registry()
                .reregister(conn.stream_mut(), SOLO_TOKEN, interest)?;
        }
    }

    let _ = poll.registry().deregister(conn.stream_mut());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::new_store_handle;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdTcpStream;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn listener_loop_serves_one_command_end_to_end() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let listener = TcpListener::from_std(std_listener);

        let store = new_store_handle(1024);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || run_listener_loop(listener, store, 4096, &stop_clone));

        thread::sleep(Duration::from_millis(50));
        let mut client = StdTcpStream::connect(addr).unwrap();
        client.write_all(b"SET k 1\r\nv\r\n").unwrap();

        let mut buf = [0u8; 64];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"STORED\r\n");

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn acceptor_loop_hands_off_every_accepted_socket() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let listener = TcpListener::from_std(std_listener);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let accepted_clone = Arc::clone(&accepted);
        let handle = thread::spawn(move || {
            run_acceptor_loop(listener, &stop_clone, move |_stream, _peer| {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
            })
        });

        thread::sleep(Duration::from_millis(50));
        let _a = StdTcpStream::connect(addr).unwrap();
        let _b = StdTcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(100));

        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn single_connection_task_runs_to_completion_on_peer_close() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        let store = new_store_handle(1024);

        let accept_handle = thread::spawn(move || std_listener.accept().unwrap());
        let mut client = StdTcpStream::connect(addr).unwrap();
        client.write_all(b"GET missing\r\n").unwrap();

        let (std_stream, peer) = accept_handle.join().unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(std_stream);

        let task_handle = thread::spawn(move || run_single_connection(stream, peer, store, 4096));

        let mut buf = [0u8; 64];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"NOT_FOUND\r\n");

        drop(client);
        task_handle.join().unwrap();
    }
}
