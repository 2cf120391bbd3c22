use crate::dns::{MAX_UDP_SIZE, MIN_UDP_SIZE};
use crate::Message;
use crate::Rcode;
use async_trait::async_trait;
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use strum_macros::Display;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// The listener a request arrived on.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Transport {
    #[strum(serialize = "udp")]
    Udp,
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "dot")]
    Tls,
    #[strum(serialize = "doh")]
    Https,
}

impl Transport {
    /// True if the response travels over a stream, so is not size limited.
    pub fn is_stream(self) -> bool {
        self != Transport::Udp
    }
}

/// Sends a response packet back to whoever asked.
#[async_trait]
pub trait ResponseWriter: Send + Sync {
    async fn write(&mut self, packet: &[u8]) -> io::Result<()>;
}

/// Replies to a UDP query directly on the listening socket.
pub(crate) struct UdpWriter {
    pub socket: Arc<UdpSocket>,
    pub peer: SocketAddr,
}

#[async_trait]
impl ResponseWriter for UdpWriter {
    async fn write(&mut self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, self.peer).await.map(|_| ())
    }
}

/// Hands the response to the task that owns the connection.
pub(crate) struct ChannelWriter(Option<oneshot::Sender<Vec<u8>>>);

impl ChannelWriter {
    pub fn new() -> (ChannelWriter, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        (ChannelWriter(Some(tx)), rx)
    }
}

#[async_trait]
impl ResponseWriter for ChannelWriter {
    async fn write(&mut self, packet: &[u8]) -> io::Result<()> {
        match self.0.take() {
            Some(tx) => tx
                .send(packet.to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")),
            None => Err(io::Error::new(io::ErrorKind::Other, "response already written")),
        }
    }
}

/// One inbound query, and the means to answer it. Answering consumes the
/// request, so it is answered at most once.
pub struct Request {
    /// The decoded query.
    pub message: Message,

    pub transport: Transport,
    pub peer: SocketAddr,

    /// Unix time the query arrived.
    pub received_at: i64,

    writer: Box<dyn ResponseWriter>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.message.id)
            .field("question", &self.message.question())
            .field("transport", &self.transport)
            .field("peer", &self.peer)
            .finish()
    }
}

impl Request {
    pub fn new(
        message: Message,
        transport: Transport,
        peer: SocketAddr,
        writer: Box<dyn ResponseWriter>,
    ) -> Request {
        Request {
            message,
            transport,
            peer,
            received_at: crate::cache::now(),
            writer,
        }
    }

    /// The largest response the client will accept. Only UDP is limited.
    pub fn max_size(&self) -> usize {
        if self.transport.is_stream() {
            return u16::MAX as usize;
        }

        match &self.message.extension {
            Some(ext) => (ext.payload_size as usize).clamp(MIN_UDP_SIZE, MAX_UDP_SIZE),
            None => MIN_UDP_SIZE,
        }
    }

    /// Sends `response`, with the query's id and RD bit. If it does not fit
    /// in a UDP response, a truncated copy is sent instead.
    pub async fn respond(mut self, mut response: Message) {
        response.set_id(self.message.id);
        response.set_rd(self.message.rd);

        let packet = match response.packet() {
            Some(packet) => Ok(packet.to_vec()),
            None => response.to_vec(),
        };

        let packet = match packet {
            Ok(packet) if packet.len() > self.max_size() => {
                debug!(
                    "{} byte response to {} is too large, truncating",
                    packet.len(),
                    self.peer
                );
                response.truncated().to_vec()
            }
            packet => packet,
        };

        let packet = match packet {
            Ok(packet) => packet,
            Err(e) => {
                warn!("failed to encode response to {:?}: {}", self, e);
                self.message.response(Rcode::ServFail).to_vec().unwrap_or_default()
            }
        };

        if let Err(e) = self.writer.write(&packet).await {
            debug!("failed to write response to {} over {}: {}", self.peer, self.transport, e);
        }
    }

    /// Answers with an empty response carrying `rcode`.
    pub async fn fail(self, rcode: Rcode) {
        debug!("answering {:?} with {}", self, rcode);
        let response = self.message.response(rcode);
        self.respond(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Class, Extension, Question, Record, Resource, Type};
    use pretty_assertions::assert_eq;

    fn request(transport: Transport, extension: Option<Extension>) -> (Request, oneshot::Receiver<Vec<u8>>) {
        let mut query = Message::query(Question::new("example.com", Type::TXT, Class::Internet), 42, true);
        query.extension = extension;

        let (writer, rx) = ChannelWriter::new();
        let peer = "192.0.2.1:1234".parse().unwrap();
        (Request::new(query, transport, peer, Box::new(writer)), rx)
    }

    fn big_response(query: &Message) -> Message {
        let mut response = query.response(Rcode::NoError);
        for _ in 0..20 {
            response.answers.push(Record::new(
                "example.com",
                Class::Internet,
                60,
                Resource::TXT(crate::TXT(vec![vec![b'x'; 100]])),
            ));
        }
        response
    }

    #[test]
    fn test_max_size() {
        let ext = |payload_size| Some(Extension { payload_size, ..Default::default() });

        assert_eq!(request(Transport::Udp, None).0.max_size(), 512);
        assert_eq!(request(Transport::Udp, ext(4096)).0.max_size(), 1232);
        assert_eq!(request(Transport::Udp, ext(100)).0.max_size(), 512);
        assert_eq!(request(Transport::Udp, ext(1000)).0.max_size(), 1000);
        assert_eq!(request(Transport::Tcp, None).0.max_size(), 65535);
    }

    #[tokio::test]
    async fn test_respond_sets_id() {
        let (req, rx) = request(Transport::Udp, None);

        let mut response = req.message.response(Rcode::NoError);
        response.set_id(7);
        response.pack().unwrap();
        req.respond(response).await;

        let got = Message::from_slice(&rx.await.unwrap()).unwrap();
        assert_eq!(got.id, 42);
        assert!(got.rd);
        assert!(!got.tc);
    }

    #[tokio::test]
    async fn test_truncates_udp() {
        let (req, rx) = request(Transport::Udp, None);
        let response = big_response(&req.message);
        req.respond(response).await;

        let got = Message::from_slice(&rx.await.unwrap()).unwrap();
        assert!(got.tc);
        assert!(got.answers.is_empty());
        assert_eq!(got.questions.len(), 1);

        // Streams get the whole thing.
        let (req, rx) = request(Transport::Tcp, None);
        let response = big_response(&req.message);
        req.respond(response).await;

        let got = Message::from_slice(&rx.await.unwrap()).unwrap();
        assert!(!got.tc);
        assert_eq!(got.answers.len(), 20);
    }

    #[tokio::test]
    async fn test_fail() {
        let (req, rx) = request(Transport::Https, None);
        req.fail(Rcode::NotImp).await;

        let got = Message::from_slice(&rx.await.unwrap()).unwrap();
        assert_eq!(got.rcode, Rcode::NotImp);
        assert_eq!(got.id, 42);
    }
}
