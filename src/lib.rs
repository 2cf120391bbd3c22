//! A caching, forwarding DNS server.
//!
//! The crate is built bottom up:
//!
//! * a wire codec ([`Message::from_slice`], [`Message::to_vec`]) for RFC 1035 messages,
//!   including name compression and the RDATA layouts in [`resource`].
//! * a zone file parser ([`zones::Zone`]) that compiles authoritative records
//!   into pre-packed answer messages.
//! * an answer [`cache::Cache`] with TTL decay and least-recently-used pruning.
//! * forwarding [`clients`] for UDP, TCP, DNS-over-TLS and DNS-over-HTTPS.
//! * a [`server::Server`] that listens on all four transports and forwards
//!   cache misses to upstream resolvers.

#[macro_use]
mod cfg;

mod display;
mod dns;
mod errors;
mod escape;
mod from_str;
mod io;
mod svcb;
mod validate;

pub mod cache;
pub mod name;
pub mod resource;
pub mod types;

cfg_feature! {
    #![any(feature = "udp", feature = "tcp", feature = "tls", feature = "doh")]
    pub mod clients;
}

cfg_feature! {
    #![feature = "zones"]
    pub mod zones;
}

cfg_feature! {
    #![feature = "server"]
    pub mod config;
    pub mod server;
}

#[macro_use]
extern crate num_derive;

#[macro_use]
extern crate lazy_static;

#[cfg(feature = "zones")]
#[macro_use]
extern crate pest_derive;

pub use crate::errors::*;
pub use crate::escape::EscapeError;
pub use crate::from_str::{parse_ttl, FromStrError};
pub use crate::resource::*;
pub use crate::types::*;

// Pull up the various types that should be on the front page of the docs.
#[doc(inline)]
pub use crate::types::Extension;
#[doc(inline)]
pub use crate::types::Message;
#[doc(inline)]
pub use crate::types::Question;
#[doc(inline)]
pub use crate::types::Record;

#[doc(inline)]
pub use crate::types::Class;

#[doc(inline)]
pub use crate::types::Type;
