//! Drives the acceptor-loop + elastic-pool wiring the multi-threaded front
//! end's `main` assembles, over real TCP sockets.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mio::net::TcpListener;

use memkv_net::executor::new_store_handle;
use memkv_net::reactor::{run_acceptor_loop, run_single_connection};
use memkv_pool::{ElasticPool, PoolConfig};

fn spawn_server(
    low: usize,
    high: usize,
) -> (std::net::SocketAddr, Arc<AtomicBool>, ElasticPool, thread::JoinHandle<()>) {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let listener = TcpListener::from_std(std_listener);

    let store = new_store_handle(4096);
    let pool = ElasticPool::new(PoolConfig {
        low_watermark: low,
        high_watermark: high,
        max_queue_size: 64,
        idle_time: Duration::from_millis(50),
    })
    .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    let pool_clone = pool.clone();
    let handle = thread::spawn(move || {
        run_acceptor_loop(listener, &stop_clone, move |stream, peer| {
            let store = Arc::clone(&store);
            let _ = pool_clone.submit(move || run_single_connection(stream, peer, store, 4096));
        })
        .unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    (addr, stop, pool, handle)
}

#[test]
fn accepted_connection_is_served_by_a_pool_task() {
    let (addr, stop, pool, handle) = spawn_server(1, 4);

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.write_all(b"PUT a 1\r\n1\r\n").unwrap();

    let mut buf = [0u8; 128];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"OK\r\n");

    client.write_all(b"GET a\r\n").unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"VALUE 1\r\n1\r\n");

    drop(client);
    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    pool.stop(true);
}

#[test]
fn concurrent_connections_grow_the_pool_above_the_low_watermark() {
    let (addr, stop, pool, handle) = spawn_server(1, 4);

    // Each client opens a connection and then parks it (no write, so the
    // connection task stays alive waiting on a readable event) long enough
    // to observe the pool having grown past one thread.
    let mut clients = Vec::new();
    for _ in 0..3 {
        let client = TcpStream::connect(addr).unwrap();
        clients.push(client);
        thread::sleep(Duration::from_millis(20));
    }

    let mut saw_growth = false;
    for _ in 0..50 {
        if pool.threads_total() > 1 {
            saw_growth = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(saw_growth, "pool never grew past the low watermark under concurrent connections");

    for client in clients {
        drop(client);
    }
    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    pool.stop(true);
}
