//! FFRDP: a reliable, ordered, connection-oriented message transport layered
//! over UDP datagrams.
//!
//! An [`Endpoint`] wraps a [`DatagramIo`] (normally [`UdpIo`]) and a transport
//! [`Engine`] that implements selective-ACK retransmission, RTT-adaptive
//! retransmission timeouts, receive-window flow control, and an optional XOR
//! forward-error-correction layer. There is no background thread: callers
//! drive progress by calling [`Endpoint::update`] on a loop.

mod config;
mod engine;
mod err;
mod fec;
mod frame;
mod io;
mod ring;
mod rtt;
mod seq;
mod wire;

mod endpoint;

pub use config::{Config, FecConfig};
pub use endpoint::Endpoint;
pub use engine::{Role, Stats};
pub use err::Error;
pub use fec::{FecCodec, FecStats, NoFec, XorFec};
pub use io::{DatagramIo, UdpIo};
