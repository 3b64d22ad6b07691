//! Load generator for a running memkv server.
//!
//! Opens `clients` concurrent TCP connections and drives
//! `requests_per_client` PUT+GET round trips on each, then reports
//! aggregate throughput and per-request latency the same way the
//! `benchmark` binary reports spawn/yield/channel rates: iteration count,
//! elapsed wall time, and a derived per-op rate.
//!
//! Usage:
//!     memkv-bench [addr] [clients] [requests_per_client] [value_size]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let addr = args.get(1).cloned().unwrap_or_else(|| "127.0.0.1:11311".to_string());
    let clients: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(8);
    let requests_per_client: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let value_size: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(32);

    println!("=== memkv benchmark ===\n");
    println!("target:              {addr}");
    println!("clients:             {clients}");
    println!("requests per client: {requests_per_client}");
    println!("value size:          {value_size} bytes\n");

    let value: Vec<u8> = vec![b'x'; value_size];

    let start = Instant::now();
    let handles: Vec<_> = (0..clients)
        .map(|id| {
            let addr = addr.clone();
            let value = value.clone();
            thread::spawn(move || run_client(id, &addr, requests_per_client, &value))
        })
        .collect();

    let mut total_latency = Duration::ZERO;
    let mut total_ops = 0u64;
    let mut errors = 0u64;
    for handle in handles {
        match handle.join() {
            Ok(stats) => {
                total_latency += stats.total_latency;
                total_ops += stats.ops;
            }
            Err(_) => errors += 1,
        }
    }
    let elapsed = start.elapsed();

    println!("--- results ---");
    println!("  total ops:     {total_ops}");
    println!("  failed clients: {errors}");
    println!("  wall time:     {elapsed:?}");
    if total_ops > 0 {
        let mean_latency_us = total_latency.as_micros() as f64 / total_ops as f64;
        println!("  mean latency:  {mean_latency_us:.1} us/op");
        println!("  throughput:    {:.0} ops/sec", total_ops as f64 / elapsed.as_secs_f64());
    }
}

struct ClientStats {
    ops: u64,
    total_latency: Duration,
}

fn run_client(id: usize, addr: &str, requests: usize, value: &[u8]) -> ClientStats {
    let mut stream = TcpStream::connect(addr)
        .unwrap_or_else(|e| panic!("client {id}: connect failed: {e}"));
    stream.set_nodelay(true).ok();

    let mut reply_buf = vec![0u8; 4096];
    let mut ops = 0u64;
    let mut total_latency = Duration::ZERO;

    for i in 0..requests {
        let key = format!("bench-{id}-{i}");

        let put_start = Instant::now();
        send_command(&mut stream, "PUT", &key, value);
        read_reply(&mut stream, &mut reply_buf);
        total_latency += put_start.elapsed();
        ops += 1;

        let get_start = Instant::now();
        send_get(&mut stream, &key);
        read_reply(&mut stream, &mut reply_buf);
        total_latency += get_start.elapsed();
        ops += 1;
    }

    ClientStats { ops, total_latency }
}

fn send_command(stream: &mut TcpStream, verb: &str, key: &str, payload: &[u8]) {
    let header = format!("{verb} {key} {}\r\n", payload.len());
    stream.write_all(header.as_bytes()).expect("write header");
    stream.write_all(payload).expect("write payload");
    stream.write_all(b"\r\n").expect("write payload terminator");
}

fn send_get(stream: &mut TcpStream, key: &str) {
    let header = format!("GET {key}\r\n");
    stream.write_all(header.as_bytes()).expect("write GET");
}

/// Reads exactly one reply line (and its payload, if the reply is `VALUE`).
/// Good enough for a benchmark client talking to a well-behaved server:
/// it trusts the wire format rather than implementing a general parser.
fn read_reply(stream: &mut TcpStream, buf: &mut [u8]) {
    let mut filled = 0;
    loop {
        let n = stream.read(&mut buf[filled..]).expect("read reply");
        if n == 0 {
            panic!("server closed the connection mid-benchmark");
        }
        filled += n;
        if let Some(end) = find_crlf(&buf[..filled]) {
            if buf[..end].starts_with(b"VALUE") {
                let declared_len: usize = std::str::from_utf8(&buf[6..end])
                    .unwrap()
                    .trim()
                    .parse()
                    .unwrap_or(0);
                let needed = end + 2 + declared_len + 2;
                if filled >= needed {
                    return;
                }
                continue;
            }
            return;
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
