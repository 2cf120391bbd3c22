//! Clients that forward a query to an upstream resolver and return its
//! response, over UDP, TCP, DNS-over-TLS or DNS-over-HTTPS.
//!
//! Each implements [`Exchanger`]. A response is only returned if it decodes
//! and carries the id of the query that produced it; otherwise the client
//! returns [`Error::InvalidMessage`](crate::Error::InvalidMessage).

use crate::Error;
use crate::Message;
use crate::Question;
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

cfg_feature! {
    #![feature = "udp"]
    mod udp;
    pub use self::udp::UdpClient;
}

cfg_feature! {
    #![feature = "tcp"]
    mod stream;
    pub use self::stream::StreamClient;
    pub use self::stream::TcpClient;
    pub(crate) use self::stream::{read_message, write_message};
}

cfg_feature! {
    #![feature = "tls"]
    mod tls;
    pub use self::tls::TlsClient;
    pub(crate) use self::tls::client_config;
}

cfg_feature! {
    #![feature = "doh"]
    mod doh;
    pub(crate) mod mime;
    mod to_urls;
    pub use self::doh::{DoHClient, GOOGLE};
    pub(crate) use self::doh::{CONTENT_TYPE_APPLICATION_DNS_MESSAGE, DNS_QUERY_PARAM};
    pub use self::to_urls::ToUrls;
}

mod stats;

pub(crate) use self::stats::StatsBuilder;

/// The timeout used by clients unless told otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out query ids. One generator may be shared by many clients so ids
/// stay unique across them.
#[derive(Debug)]
pub struct IdGenerator(AtomicU16);

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator(AtomicU16::new(rand::random()))
    }
}

impl IdGenerator {
    pub fn new() -> IdGenerator {
        IdGenerator::default()
    }

    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Exchanger takes a query and returns a response.
#[async_trait]
pub trait Exchanger: Send {
    /// Sends the query and waits for its response.
    async fn query(&mut self, query: &Message) -> Result<Message>;

    /// Builds a query for `question` with a fresh id, and sends it.
    async fn lookup(&mut self, question: Question, recursion: bool) -> Result<Message> {
        let query = Message::query(question, self.next_id(), recursion);
        self.query(&query).await
    }

    /// Releases any connection held by the client.
    async fn close(&mut self) -> Result<()>;

    fn set_timeout(&mut self, timeout: Duration);

    fn next_id(&self) -> u16;
}

/// Runs `f`, failing with [`Error::Timeout`] if it takes longer than `timeout`.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, f: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    }
}

/// Decodes a response and checks it is the answer to `query`.
pub(crate) fn decode_response(query: &Message, buf: &[u8]) -> Result<Message> {
    let resp = Message::from_slice(buf)?;
    if resp.id != query.id {
        return Err(Error::InvalidMessage(format!(
            "response id {} does not match query id {}",
            resp.id, query.id
        )));
    }
    Ok(resp)
}
