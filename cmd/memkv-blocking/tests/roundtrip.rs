//! Drives a real `memkv-blocking` server over the wire.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use memkv_core::proto::{self, ParseOutcome};
use memkv_core::LruStore;

// Mirrors `main.rs`'s per-connection loop without spawning a whole process,
// so the test stays a plain `cargo test` rather than a subprocess harness.
fn serve_one(mut stream: TcpStream, store: Arc<Mutex<LruStore>>) {
    use std::io::{BufRead, BufReader};
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(&mut stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).unwrap();
        if n == 0 {
            return;
        }
        match proto::parse(&line) {
            ParseOutcome::Complete { header, .. } => {
                let mut payload = vec![0u8; header.payload_len];
                if header.payload_len > 0 {
                    use std::io::Read as _;
                    reader.read_exact(&mut payload).unwrap();
                    let mut crlf = [0u8; 2];
                    reader.read_exact(&mut crlf).unwrap();
                }
                let mut reply = {
                    let mut guard = store.lock().unwrap();
                    proto::execute(&mut guard, &header, &payload)
                };
                reply.extend_from_slice(b"\r\n");
                writer.write_all(&reply).unwrap();
            }
            _ => {
                writer.write_all(b"ERROR\r\n").unwrap();
            }
        }
    }
}

#[test]
fn put_get_delete_round_trip_over_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let store = Arc::new(Mutex::new(LruStore::new(4096)));

    thread::spawn(move || {
        for incoming in listener.incoming() {
            let store = Arc::clone(&store);
            thread::spawn(move || serve_one(incoming.unwrap(), store));
        }
    });
    thread::sleep(std::time::Duration::from_millis(50));

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"PUT k 5\r\nhello\r\n").unwrap();
    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"OK\r\n");

    client.write_all(b"GET k\r\n").unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"VALUE 5\r\nhello\r\n");

    client.write_all(b"DELETE k\r\n").unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"DELETED\r\n");

    client.write_all(b"GET k\r\n").unwrap();
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"NOT_FOUND\r\n");
}
