#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server endpoint has not yet accepted a peer")]
    NotConnected,

    #[error("send queue is full")]
    SendQueueFull,

    #[error("payload cannot be chunked into frames (mtu is zero)")]
    PayloadTooLarge,

    #[error("byebye is only valid on a client endpoint")]
    NotClient,
}
