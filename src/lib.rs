//! Multicast DNS responder with a live record cache.
//!
//! A [`Responder`] joins the mDNS multicast group and keeps a [`Cache`] of every answer seen on
//! the network. Answers are re-queried before they expire for as long as some [`Query`] is
//! interested in them, and registered [`Service`]s are advertised and answered for.
//!
//! ```no_run
//! use mdns_responder::{RecordType, Responder};
//!
//! let responder = Responder::new()?;
//! let query = responder.query("_http._tcp.local", RecordType::PTR)?;
//! for answer in &query {
//!     println!("{}", answer);
//! }
//! # Ok::<(), mdns_responder::Error>(())
//! ```

mod cache;
mod error;
mod num;
pub mod packet;
mod query;
mod record;
mod responder;
mod service;
mod transport;

pub use cache::Cache;
pub use error::{Error, Result};
pub use packet::{
    name::{DomainName, Label, NameFilter},
    records::Record,
    RecordType,
};
pub use query::{BackgroundQuery, Iter, Query};
pub use record::{Answer, Question};
pub use responder::{Config, Responder};
pub use service::{Service, ServiceBuilder, ServiceHandle};
pub use transport::{MulticastSocket, Transport};

/// Size of multicast DNS message buffers.
///
/// mDNS works entirely within a local network, so messages may be much larger than the 512 bytes
/// of unicast DNS. Received datagrams longer than this are truncated.
pub const MDNS_BUFFER_SIZE: usize = 9000;
