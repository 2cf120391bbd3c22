use crate::bail;
use crate::cache::{Answer, Cache};
use crate::clients::{DoHClient, Exchanger, IdGenerator, TcpClient, TlsClient, UdpClient};
use crate::config::Upstream;
use crate::dns::MAX_UDP_SIZE;
use crate::server::handler::{recv, Active, Receivers};
use crate::server::request::Request;
use crate::Extension;
use crate::Message;
use crate::Rcode;
use crate::Result;
use http::Method;
use log::{debug, info, warn};
use rustls::ClientConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Settings shared by every forwarder.
#[derive(Clone)]
pub(crate) struct Settings {
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub keepalive: Duration,
    pub tls: Arc<ClientConfig>,
    pub ids: Arc<IdGenerator>,
}

enum Exit {
    Stopped,
    Reconnect,
}

/// Relays queued requests to one upstream, for as long as the server runs.
pub(crate) struct Forwarder {
    upstream: Upstream,
    settings: Settings,
    queues: Receivers,
    cache: Arc<Cache>,
    active: Arc<Active>,
    stop: watch::Receiver<bool>,

    forwarded: u64,
}

impl Forwarder {
    pub fn new(
        upstream: Upstream,
        settings: Settings,
        queues: Receivers,
        cache: Arc<Cache>,
        active: Arc<Active>,
        stop: watch::Receiver<bool>,
    ) -> Forwarder {
        Forwarder {
            upstream,
            settings,
            queues,
            cache,
            active,
            stop,
            forwarded: 0,
        }
    }

    /// Connects, serves until the connection fails, and reconnects, until
    /// told to stop.
    pub async fn run(mut self) {
        info!("forwarder for {} started", self.upstream);

        loop {
            if *self.stop.borrow() {
                break;
            }

            let mut client = match self.connect().await {
                Ok(client) => client,
                Err(e) => {
                    warn!(
                        "failed to connect to {}: {}, retrying in {:?}",
                        self.upstream, e, self.settings.retry_delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.retry_delay) => continue,
                        _ = self.stop.changed() => break,
                    }
                }
            };

            info!("connected to {}", self.upstream);
            let stream = self.upstream.is_stream();

            self.active.up(stream);
            let exit = self.serve(client.as_mut()).await;
            self.active.down(stream);

            if let Err(e) = client.close().await {
                debug!("failed to close connection to {}: {}", self.upstream, e);
            }

            match exit {
                Exit::Stopped => break,
                Exit::Reconnect => info!("reconnecting to {}", self.upstream),
            }
        }

        info!(
            "forwarder for {} stopped after {} queries",
            self.upstream, self.forwarded
        );
    }

    async fn connect(&self) -> Result<Box<dyn Exchanger>> {
        let ids = self.settings.ids.clone();

        let mut client: Box<dyn Exchanger> = match &self.upstream {
            Upstream::Udp(addr) => Box::new(UdpClient::connect(*addr).await?.with_ids(ids)),
            Upstream::Tcp(addr) => Box::new(TcpClient::connect(*addr).await?.with_ids(ids)),
            Upstream::Tls { host, port } => {
                let addr = resolve(host, *port).await?;
                let client = TlsClient::connect_with(addr, host, self.settings.tls.clone()).await?;
                Box::new(client.with_ids(ids))
            }
            Upstream::Https(url) => Box::new(DoHClient::new(url.clone(), Method::POST)?.with_ids(ids)),
        };

        client.set_timeout(self.settings.timeout);
        Ok(client)
    }

    /// Takes requests off the queues until stopped or the connection breaks.
    async fn serve(&mut self, client: &mut dyn Exchanger) -> Exit {
        let shared = self.queues.shared.clone();
        let stream = self.queues.stream.clone();
        let serves_stream = self.upstream.is_stream();

        let mut keepalive = tokio::time::interval(self.settings.keepalive);
        keepalive.tick().await; // The first tick is immediate.

        loop {
            let request = tokio::select! {
                _ = self.stop.changed() => return Exit::Stopped,
                _ = keepalive.tick() => {
                    debug!("{} is idle, {} queries forwarded", self.upstream, self.forwarded);
                    continue;
                }
                Some(request) = recv(&shared) => request,
                Some(request) = recv(&stream), if serves_stream => request,
                else => return Exit::Stopped,
            };

            if let Err(e) = self.forward(client, request).await {
                if e.is_connection_error() {
                    warn!("connection to {} failed: {}", self.upstream, e);
                    return Exit::Reconnect;
                }
            }
        }
    }

    /// Forwards one request, and answers it. Good answers are cached.
    ///
    /// The request is always answered, with SERVFAIL if the upstream gave
    /// nothing usable. Only errors that mean the connection should be
    /// dropped are returned.
    async fn forward(&mut self, client: &mut dyn Exchanger, request: Request) -> Result<()> {
        let question = match request.message.question() {
            Some(question) => question.clone(),
            None => {
                request.fail(Rcode::FormErr).await;
                return Ok(());
            }
        };

        let mut query = Message::query(question.clone(), client.next_id(), request.message.rd);
        query.cd = request.message.cd;
        query.extension = request.message.extension.as_ref().map(|ext| Extension {
            payload_size: MAX_UDP_SIZE as u16,
            dnssec_ok: ext.dnssec_ok,
            ..Default::default()
        });

        self.forwarded += 1;
        let response = match client.query(&query).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} failed to answer {:?}: {}", self.upstream, question, e);
                request.fail(Rcode::ServFail).await;
                return Err(e);
            }
        };

        if response.question() != Some(&question) {
            warn!(
                "{} answered {:?} with the question {:?}",
                self.upstream,
                question,
                response.question()
            );
            request.fail(Rcode::ServFail).await;
            return Ok(());
        }

        if response.rcode != Rcode::NoError || response.tc || response.answers.is_empty() {
            debug!(
                "not caching {} answer for {:?} from {} (truncated: {}, answers: {})",
                response.rcode,
                question,
                self.upstream,
                response.tc,
                response.answers.len()
            );
        } else if self.cache.upsert(Answer::external(question.clone(), response.clone())) {
            debug!("cached {:?} from {}", question, self.upstream);
        } else {
            debug!("refreshed {:?} from {}", question, self.upstream);
        }

        request.respond(response).await;
        Ok(())
    }
}

/// Resolves a DoT upstream's host, using the system resolver for names.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    match tokio::net::lookup_host((host, port)).await?.next() {
        Some(addr) => Ok(addr),
        None => bail!(NotFound, "no addresses found for '{}'", host),
    }
}
