use crate::cache::{now, Cache};
use crate::server::request::{Request, ResponseWriter, Transport};
use crate::Message;
use crate::Opcode;
use crate::Rcode;
use crate::QR;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// A queue shared by several forwarders.
pub(crate) type SharedReceiver = Arc<tokio::sync::Mutex<Receiver<Request>>>;

/// The consuming ends of the forward queues.
#[derive(Clone)]
pub(crate) struct Receivers {
    /// Queries from UDP, DoT and DoH, taken by every forwarder.
    pub shared: SharedReceiver,

    /// Queries from TCP, taken by the stream forwarders.
    pub stream: SharedReceiver,
}

/// Pops the next request, waiting for one if the queue is empty.
pub(crate) async fn recv(queue: &SharedReceiver) -> Option<Request> {
    queue.lock().await.recv().await
}

#[derive(Debug, Default)]
struct Counts {
    all: usize,
    stream: usize,
}

/// How many forwarders currently have a working connection.
#[derive(Debug, Default)]
pub(crate) struct Active(Mutex<Counts>);

impl Active {
    fn lock(&self) -> std::sync::MutexGuard<'_, Counts> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn up(&self, stream: bool) {
        let mut counts = self.lock();
        counts.all += 1;
        if stream {
            counts.stream += 1;
        }
    }

    pub fn down(&self, stream: bool) {
        let mut counts = self.lock();
        counts.all = counts.all.saturating_sub(1);
        if stream {
            counts.stream = counts.stream.saturating_sub(1);
        }
    }

    /// Returns (all, stream) active counts.
    pub fn counts(&self) -> (usize, usize) {
        let counts = self.lock();
        (counts.all, counts.stream)
    }
}

/// Decides what to do with each query: refuse it, answer it from the
/// cache, or queue it for a forwarder.
pub(crate) struct Handler {
    cache: Arc<Cache>,
    shared: Sender<Request>,
    stream: Sender<Request>,
    active: Arc<Active>,
}

impl Handler {
    pub fn new(cache: Arc<Cache>, queue_size: usize) -> (Handler, Receivers, Arc<Active>) {
        let (shared, shared_rx) = mpsc::channel(queue_size);
        let (stream, stream_rx) = mpsc::channel(queue_size);
        let active = Arc::new(Active::default());

        let handler = Handler {
            cache,
            shared,
            stream,
            active: active.clone(),
        };
        let receivers = Receivers {
            shared: Arc::new(tokio::sync::Mutex::new(shared_rx)),
            stream: Arc::new(tokio::sync::Mutex::new(stream_rx)),
        };

        (handler, receivers, active)
    }

    /// Decodes and handles a raw query. A query that can't be decoded is
    /// answered with FORMERR if it asks other than one question, or SERVFAIL
    /// otherwise, if it at least has a header to answer.
    pub async fn handle_packet(
        &self,
        packet: &[u8],
        transport: Transport,
        peer: SocketAddr,
        mut writer: Box<dyn ResponseWriter>,
    ) {
        match Message::from_slice(packet) {
            Ok(message) => self.handle(Request::new(message, transport, peer, writer)).await,
            Err(e) => {
                warn!("malformed query from {} over {}: {}", peer, transport, e);

                if let Some(response) = Message::error_response(packet, malformed_rcode(packet)) {
                    if let Err(e) = writer.write(&response).await {
                        debug!("failed to write response to {}: {}", peer, e);
                    }
                }
            }
        }
    }

    pub async fn handle(&self, request: Request) {
        let message = &request.message;

        if message.qr == QR::Response {
            debug!("ignoring response from {}", request.peer);
            return;
        }

        if message.questions.len() != 1 {
            debug!("{} questions from {}", message.questions.len(), request.peer);
            return request.fail(Rcode::FormErr).await;
        }

        let question = message.questions[0].clone();
        if message.opcode != Opcode::Query
            || !question.r#type.is_supported()
            || !question.class.is_supported()
        {
            info!(
                "not implemented: {} {:?} from {}",
                message.opcode, question, request.peer
            );
            return request.fail(Rcode::NotImp).await;
        }

        if let Some(answer) = self.cache.get(&question) {
            if !answer.is_expired(now()) {
                debug!("cache hit for {:?} from {}", question, request.peer);
                return request.respond(answer.message).await;
            }
            debug!("cached answer for {:?} has expired", question);
        }

        if let Err(request) = self.enqueue(request) {
            warn!("no forwarder available for {:?}", request);
            request.fail(Rcode::ServFail).await;
        }
    }

    /// Queues the request for a forwarder, giving it back if there is no
    /// forwarder to take it.
    fn enqueue(&self, request: Request) -> Result<(), Request> {
        let (all, stream) = self.active.counts();
        if all == 0 {
            return Err(request);
        }

        let queue = match request.transport == Transport::Tcp && stream > 0 {
            true => &self.stream,
            false => &self.shared,
        };

        queue.try_send(request).map_err(|e| match e {
            TrySendError::Full(request) => {
                warn!("forward queue is full");
                request
            }
            TrySendError::Closed(request) => request,
        })
    }
}

/// The rcode for a query that failed to decode.
fn malformed_rcode(packet: &[u8]) -> Rcode {
    match packet {
        [_, _, flags, _, hi, lo, ..] if flags & 0x80 == 0 => match u16::from_be_bytes([*hi, *lo]) {
            1 => Rcode::ServFail,
            _ => Rcode::FormErr,
        },
        _ => Rcode::ServFail,
    }
}
