use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no such device: {name}")]
    NoDevice { name: String },

    #[error("out of memory: {0}")]
    NoMemory(String),

    #[error("{op}: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("corrupted frame on kernel ring (MAC offset {mac} + caplen {caplen} > frame size {frame_size})")]
    CorruptFrame { mac: u32, caplen: u32, frame_size: u32 },

    #[error("transmit ring full")]
    TxAgain,

    #[error("filter error: {0}")]
    Filter(String),

    #[error("invalid state: {0}")]
    State(String),
}

impl Error {
    /// Wrap the current `errno` with the name of the failed call.
    pub(crate) fn os(op: &'static str) -> Self {
        Error::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
