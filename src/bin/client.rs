//! Demonstration client harness: connects to an FFRDP server, sends
//! randomly-sized payloads as fast as the send queue allows, and prints a
//! throughput line every ~10 seconds. Hands off to `byebye` on Ctrl-C.
//!
//! Usage: `client --connect=127.0.0.1:8000`

use std::time::{Duration, Instant};

use ffrdp::{Config, Endpoint};
use rand::Rng;

fn parse_connect_addr() -> String {
    std::env::args()
        .find_map(|arg| arg.strip_prefix("--connect=").map(str::to_owned))
        .unwrap_or_else(|| "127.0.0.1:8000".to_owned())
}

fn main() {
    env_logger::init();

    let connect_addr = parse_connect_addr();
    let mut endpoint = Endpoint::client(&connect_addr, Config::default())
        .unwrap_or_else(|e| panic!("failed to connect to {connect_addr}: {e}"));
    log::info!("ffrdp client connecting to {connect_addr}");

    let mut rng = rand::thread_rng();
    let mut send_buf = vec![0u8; 16 * 1024];
    let mut recv_buf = vec![0u8; 64 * 1024];
    let mut tick_start = Instant::now();
    let mut total_bytes: u64 = 0;

    loop {
        let size = 1 + rng.gen_range(0..send_buf.len());
        rng.fill(&mut send_buf[..size]);
        let _ = endpoint.send(&send_buf[..size]);

        let n = endpoint.recv(&mut recv_buf);
        if n > 0 {
            total_bytes += n as u64;
        }

        if tick_start.elapsed() > Duration::from_secs(10) {
            let kb_per_sec = total_bytes as f64 / 1024.0 / tick_start.elapsed().as_secs_f64();
            println!("client receive: {kb_per_sec:.2} KB/s");
            println!("{:#?}", endpoint.dump());
            tick_start = Instant::now();
            total_bytes = 0;
        }

        endpoint.update();
    }
}
