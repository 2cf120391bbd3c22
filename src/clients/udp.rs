use crate::clients::{decode_response, with_timeout, Exchanger, IdGenerator, DEFAULT_TIMEOUT};
use crate::clients::StatsBuilder;
use crate::dns::MAX_UDP_SIZE;
use crate::Message;
use crate::Result;
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// A UDP DNS Client.
///
/// # Example
///
/// ```rust,no_run
/// use rdns::clients::{Exchanger, UdpClient};
/// use rdns::{Class, Question, Type};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rdns::Error> {
///     let mut client = UdpClient::connect("8.8.8.8:53".parse().unwrap()).await?;
///     let question = Question::new("bramp.net", Type::A, Class::Internet);
///
///     let response = client.lookup(question, true).await?;
///     println!("{}", response);
///     Ok(())
/// }
/// ```
///
/// See <https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.1>
pub struct UdpClient {
    server: SocketAddr,
    socket: Option<UdpSocket>,
    timeout: Duration,
    ids: Arc<IdGenerator>,
}

impl UdpClient {
    /// Binds a local socket and connects it to `server`, so only datagrams
    /// from the server are received.
    pub async fn connect(server: SocketAddr) -> Result<UdpClient> {
        let local = match server {
            SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        Ok(UdpClient {
            server,
            socket: Some(socket),
            timeout: DEFAULT_TIMEOUT,
            ids: Arc::new(IdGenerator::new()),
        })
    }

    /// Shares an id generator with other clients.
    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

#[async_trait]
impl Exchanger for UdpClient {
    /// Sends the query [`Message`] to the `server` via UDP and returns the result.
    async fn query(&mut self, query: &Message) -> Result<Message> {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => crate::bail!(NotConnected, "client to {} is closed", self.server),
        };

        let req = query.to_vec()?;
        let stats = StatsBuilder::start(req.len());

        let mut buf = vec![0; MAX_UDP_SIZE];
        let len = with_timeout(self.timeout, async {
            socket.send(&req).await?;
            Ok(socket.recv(&mut buf).await?)
        })
        .await?;

        let mut resp = decode_response(query, &buf[..len])?;
        resp.stats = Some(stats.end(self.server, len));
        Ok(resp)
    }

    async fn close(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn next_id(&self) -> u16 {
        self.ids.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Class, Error, Question, Rcode, Type};
    use pretty_assertions::assert_eq;

    /// Answers a single query with `rcode`, using `id` for the response id.
    async fn fake_server(rcode: Rcode, id: Option<u16>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0; 512];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let query = Message::from_slice(&buf[..len]).unwrap();

            let mut resp = query.response(rcode);
            if let Some(id) = id {
                resp.id = id;
            }
            socket.send_to(&resp.to_vec().unwrap(), peer).await.unwrap();
        });

        addr
    }

    #[tokio::test]
    async fn test_lookup() {
        let addr = fake_server(Rcode::NXDomain, None).await;
        let mut client = UdpClient::connect(addr).await.unwrap();

        let question = Question::new("example.com", Type::A, Class::Internet);
        let resp = client.lookup(question.clone(), true).await.unwrap();

        assert_eq!(resp.rcode, Rcode::NXDomain);
        assert_eq!(resp.question(), Some(&question));
        assert_eq!(resp.stats.unwrap().server, addr);
    }

    #[tokio::test]
    async fn test_id_mismatch() {
        let mut client = UdpClient::connect(fake_server(Rcode::NoError, Some(1)).await)
            .await
            .unwrap();

        let query = Message::query(Question::new("example.com", Type::A, Class::Internet), 2, true);
        assert!(matches!(
            client.query(&query).await,
            Err(Error::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        // Nothing answers on this socket.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut client = UdpClient::connect(silent.local_addr().unwrap()).await.unwrap();
        client.set_timeout(Duration::from_millis(50));

        let question = Question::new("example.com", Type::A, Class::Internet);
        assert!(matches!(
            client.lookup(question, true).await,
            Err(Error::Timeout(_))
        ));

        client.close().await.unwrap();
        let question = Question::new("example.com", Type::A, Class::Internet);
        assert!(matches!(client.lookup(question, true).await, Err(Error::Io(_))));
    }
}
