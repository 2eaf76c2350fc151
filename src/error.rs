use std::io;

use crate::packet;

/// Errors returned by the responder.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An inbound datagram could not be decoded.
    #[error("malformed message: {0}")]
    Decode(#[source] packet::Error),

    /// Sending a datagram failed.
    #[error("failed to send message: {0}")]
    Transmission(#[source] io::Error),

    /// The multicast socket could not be set up.
    #[error("invalid transport configuration: {0}")]
    Configuration(#[source] io::Error),

    /// A name given by the caller is not a valid domain name.
    #[error("invalid domain name: {0}")]
    InvalidName(#[source] packet::Error),

    /// A worker thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Thread(#[source] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
