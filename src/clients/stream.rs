use crate::clients::{decode_response, with_timeout, Exchanger, IdGenerator, DEFAULT_TIMEOUT};
use crate::clients::StatsBuilder;
use crate::Message;
use crate::Result;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Writes a message with its two byte length prefix, in a single write.
pub(crate) async fn write_message<W>(w: &mut W, message: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = match u16::try_from(message.len()) {
        Ok(len) => len,
        Err(_) => crate::bail!(InvalidInput, "{} byte message is too long", message.len()),
    };

    let mut buf = Vec::with_capacity(2 + message.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(message);

    w.write_all(&buf).await?;
    w.flush().await
}

/// Reads a length prefixed message. Returns `None` if the stream was closed
/// cleanly before the next message.
pub(crate) async fn read_message<R>(r: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0; 2];
    match r.read_exact(&mut len).await {
        Ok(_) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut buf = vec![0; usize::from(u16::from_be_bytes(len))];
    r.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// A DNS client over a connected byte stream, where each message is prefixed
/// with its two byte length. The connection is opened once and reused for
/// every query.
///
/// See <https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2>
pub struct StreamClient<S> {
    server: SocketAddr,
    stream: Option<S>,
    timeout: Duration,
    ids: Arc<IdGenerator>,
}

/// A TCP DNS Client.
///
/// # Example
///
/// ```rust,no_run
/// use rdns::clients::{Exchanger, TcpClient};
/// use rdns::{Class, Question, Type};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rdns::Error> {
///     let mut client = TcpClient::connect("8.8.8.8:53".parse().unwrap()).await?;
///     let question = Question::new("bramp.net", Type::A, Class::Internet);
///
///     let response = client.lookup(question, true).await?;
///     println!("{}", response);
///     Ok(())
/// }
/// ```
pub type TcpClient = StreamClient<TcpStream>;

impl<S> StreamClient<S> {
    pub(crate) fn new(server: SocketAddr, stream: S) -> Self {
        StreamClient {
            server,
            stream: Some(stream),
            timeout: DEFAULT_TIMEOUT,
            ids: Arc::new(IdGenerator::new()),
        }
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

/// Opens a TCP connection to `server`, giving up after `timeout`.
pub(crate) async fn connect_tcp(server: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = with_timeout(timeout, async { Ok(TcpStream::connect(server).await?) }).await?;

    // We send discrete packets, so we can send as soon as possible.
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl StreamClient<TcpStream> {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        Ok(Self::new(server, connect_tcp(server, DEFAULT_TIMEOUT).await?))
    }
}

#[async_trait]
impl<S> Exchanger for StreamClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Sends the [`Message`] to the `server` and returns the result.
    async fn query(&mut self, query: &Message) -> Result<Message> {
        let stream = match &mut self.stream {
            Some(stream) => stream,
            None => crate::bail!(NotConnected, "client to {} is closed", self.server),
        };

        let req = query.to_vec()?;
        let stats = StatsBuilder::start(req.len());

        let buf = with_timeout(self.timeout, async {
            write_message(stream, &req).await?;
            match read_message(stream).await? {
                Some(buf) => Ok(buf),
                None => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            }
        })
        .await?;

        let mut resp = decode_response(query, &buf)?;
        resp.stats = Some(stats.end(self.server, buf.len()));
        Ok(resp)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
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
    use crate::{Class, Question, Rcode, Type};
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_framing() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_message(&mut a, b"hello").await.unwrap();
        write_message(&mut a, b"").await.unwrap();
        drop(a);

        assert_eq!(read_message(&mut b).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_message(&mut b).await.unwrap(), Some(vec![]));
        assert_eq!(read_message(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&[0, 10, 1, 2]).await.unwrap();
        drop(a);

        assert!(read_message(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn test_reuses_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // Only one connection is accepted, for both queries.
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Some(buf) = read_message(&mut stream).await.unwrap() {
                let query = Message::from_slice(&buf).unwrap();
                let resp = query.response(Rcode::Refused).to_vec().unwrap();
                write_message(&mut stream, &resp).await.unwrap();
            }
        });

        let mut client = TcpClient::connect(addr).await.unwrap();
        for name in ["a.example.com", "b.example.com"] {
            let question = Question::new(name, Type::MX, Class::Internet);
            let resp = client.lookup(question.clone(), false).await.unwrap();
            assert_eq!(resp.rcode, Rcode::Refused);
            assert_eq!(resp.question(), Some(&question));
        }

        client.close().await.unwrap();
    }
}
