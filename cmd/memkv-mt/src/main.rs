//! memkv multi-threaded front end.
//!
//! `config.acceptors` threads each `accept()` on their own `SO_REUSEPORT`
//! listener bound to the same port, so the kernel load-balances incoming
//! connections across them. Each accepted connection becomes one task
//! submitted to a shared [`memkv_pool::ElasticPool`]: the task owns that
//! connection's entire non-blocking lifecycle on its own private `Poll`, so
//! each connection gets its own event loop, work partitioned by file
//! descriptor. The pool's thread count tracks the number of concurrently
//! open connections between the low and high watermark, growing and
//! decaying as connections open and close.
//!
//! Usage:
//!     memkv-mt [port] [store_max_bytes] [acceptors] [pool_low] [pool_high]

use std::io;
use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use mio::net::TcpListener;

use memkv_net::reactor::{run_acceptor_loop, run_single_connection};
use memkv_net::{executor, ServerConfig};
use memkv_pool::{ElasticPool, PoolConfig};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::from_args(&args);
    if let Some(acceptors) = args.get(3).and_then(|s| s.parse().ok()) {
        config.acceptors = acceptors;
    }
    if let Some(low) = args.get(4).and_then(|s| s.parse().ok()) {
        config.pool_low_watermark = low;
    }
    if let Some(high) = args.get(5).and_then(|s| s.parse().ok()) {
        config.pool_high_watermark = high;
    }
    if let Err(e) = config.validate() {
        eprintln!("memkv-mt: invalid configuration: {e}");
        std::process::exit(1);
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as usize);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as usize);
    }

    let addr: SocketAddrV4 = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .expect("memkv-mt binds IPv4 addresses only");

    let store = executor::new_store_handle(config.store_max_bytes);
    let pool = ElasticPool::new(PoolConfig {
        low_watermark: config.pool_low_watermark,
        high_watermark: config.pool_high_watermark,
        max_queue_size: config.pool_max_queue_size,
        idle_time: config.pool_idle_time,
    })
    .expect("invalid pool configuration");

    tracing::info!(
        port = config.port,
        acceptors = config.acceptors,
        low_watermark = config.pool_low_watermark,
        high_watermark = config.pool_high_watermark,
        "memkv-mt listening"
    );

    let mut acceptor_handles = Vec::with_capacity(config.acceptors);
    for id in 0..config.acceptors {
        let listener = bind_reuseport(addr).expect("bind failed");
        listener.set_nonblocking(true).expect("set_nonblocking failed");
        let listener = TcpListener::from_std(listener);

        let pool = pool.clone();
        let store = Arc::clone(&store);
        let read_buf_size = config.read_buf_size;

        let handle = thread::Builder::new()
            .name(format!("memkv-acceptor-{id}"))
            .spawn(move || {
                let result = run_acceptor_loop(listener, &STOP, |stream, peer| {
                    let store = Arc::clone(&store);
                    if pool
                        .submit(move || run_single_connection(stream, peer, store, read_buf_size))
                        .is_err()
                    {
                        tracing::warn!(peer = %peer, "pool saturated, dropping connection");
                    }
                });
                if let Err(e) = result {
                    tracing::error!(acceptor = id, error = %e, "acceptor loop exited with an error");
                }
            })
            .expect("failed to spawn acceptor thread");
        acceptor_handles.push(handle);
    }

    for handle in acceptor_handles {
        let _ = handle.join();
    }

    // Every acceptor has stopped taking new connections; let in-flight
    // connection tasks finish draining in-flight commands before the
    // process exits.
    pool.stop(true);
    tracing::info!("memkv-mt shut down");
}

/// Bind a `SO_REUSEPORT` listener so every acceptor thread can share the
/// same port and let the kernel load-balance `accept()`s across them.
fn bind_reuseport(addr: SocketAddrV4) -> io::Result<std::net::TcpListener> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let opt: libc::c_int = 1;
        let opt_size = mem::size_of::<libc::c_int>() as libc::socklen_t;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const libc::c_void,
            opt_size,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &opt as *const _ as *const libc::c_void,
            opt_size,
        );

        let mut sin: libc::sockaddr_in = mem::zeroed();
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = addr.port().to_be();
        sin.sin_addr.s_addr = u32::from_ne_bytes(addr.ip().octets());

        let bind_ret = libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        if bind_ret != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        if libc::listen(fd, 1024) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(std::net::TcpListener::from_raw_fd(fd))
    }
}
