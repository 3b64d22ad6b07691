//! memkv single-threaded front end.
//!
//! One reactor thread, one `mio::Poll`, one `Slab` of connections — a
//! cooperative non-blocking loop, with no worker pool involved at all.
//! `SIGINT`/`SIGTERM` flip an atomic the loop's bounded `poll()` timeout
//! checks each iteration.
//!
//! Usage:
//!     memkv-st [port] [store_max_bytes]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::net::TcpListener;

use memkv_net::reactor::run_listener_loop;
use memkv_net::{executor, ServerConfig};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = ServerConfig::from_args(&args);
    if let Err(e) = config.validate() {
        eprintln!("memkv-st: invalid configuration: {e}");
        std::process::exit(1);
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as usize);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as usize);
    }

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .expect("invalid bind address");
    let std_listener = std::net::TcpListener::bind(addr).expect("bind failed");
    std_listener.set_nonblocking(true).expect("set_nonblocking failed");
    let listener = TcpListener::from_std(std_listener);

    let store = executor::new_store_handle(config.store_max_bytes);

    tracing::info!(
        port = config.port,
        store_max_bytes = config.store_max_bytes,
        "memkv-st listening"
    );

    if let Err(e) = run_listener_loop(listener, store, config.read_buf_size, &STOP) {
        tracing::error!(error = %e, "reactor loop exited with an error");
        std::process::exit(1);
    }

    tracing::info!("memkv-st shut down");
}
