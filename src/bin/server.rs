//! Demonstration server harness: binds an FFRDP server endpoint, echoes
//! whatever it receives back to the sender, and prints a throughput line
//! every ~10 seconds.
//!
//! Usage: `server --bind=0.0.0.0:8000`

use std::time::{Duration, Instant};

use ffrdp::{Config, Endpoint};

fn parse_bind_addr() -> String {
    std::env::args()
        .find_map(|arg| arg.strip_prefix("--bind=").map(str::to_owned))
        .unwrap_or_else(|| "0.0.0.0:8000".to_owned())
}

fn main() {
    env_logger::init();

    let bind_addr = parse_bind_addr();
    let mut endpoint = Endpoint::server(&bind_addr, Config::default())
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));
    log::info!("ffrdp server listening on {bind_addr}");

    let mut recv_buf = vec![0u8; 64 * 1024];
    let mut tick_start = Instant::now();
    let mut total_bytes: u64 = 0;

    loop {
        let n = endpoint.recv(&mut recv_buf);
        if n > 0 {
            total_bytes += n as u64;
            let _ = endpoint.send(&recv_buf[..n]);
        }

        if tick_start.elapsed() > Duration::from_secs(10) {
            let kb_per_sec = total_bytes as f64 / 1024.0 / tick_start.elapsed().as_secs_f64();
            println!("server receive: {kb_per_sec:.2} KB/s");
            println!("{:#?}", endpoint.dump());
            tick_start = Instant::now();
            total_bytes = 0;
        }

        endpoint.update();
    }
}
