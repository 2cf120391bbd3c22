use crate::bail;
use crate::clients::mime::content_type_equal;
use crate::clients::StatsBuilder;
use crate::clients::ToUrls;
use crate::clients::{decode_response, with_timeout, Exchanger, IdGenerator, DEFAULT_TIMEOUT};
use crate::dns::HEADER_LEN;
use crate::Error;
use crate::Message;
use crate::Result;
use async_trait::async_trait;
use http::header::*;
use http::{Method, Request, Response, StatusCode};
use hyper::client::connect::HttpInfo;
use hyper::client::HttpConnector;
use hyper::{Body, Client as HyperClient};
use hyper_alpn::AlpnConnector;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const GOOGLE: &str = "https://dns.google/dns-query";

/// For use in Content-type and Accept headers
pub(crate) const CONTENT_TYPE_APPLICATION_DNS_MESSAGE: &str = "application/dns-message";

/// The param name that contains the DNS request.
pub(crate) const DNS_QUERY_PARAM: &str = "dns";

/// https URLs negotiate HTTP/2 with ALPN. Plain http is only used for
/// talking to local servers.
enum Transport {
    Alpn(HyperClient<AlpnConnector>),
    Plain(HyperClient<HttpConnector>),
}

/// A DNS over HTTPS (DoH) Client (rfc8484).
///
/// # Example
///
/// ```rust,no_run
/// use http::method::Method;
/// use rdns::clients::{DoHClient, Exchanger};
/// use rdns::{Class, Question, Type};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rdns::Error> {
///     let mut client = DoHClient::new("https://dns.google/dns-query", Method::GET)?;
///     let question = Question::new("bramp.net", Type::A, Class::Internet);
///
///     let response = client.lookup(question, true).await?;
///     println!("{}", response);
///     Ok(())
/// }
/// ```
///
/// See <https://datatracker.ietf.org/doc/html/rfc8484>
pub struct DoHClient {
    server: Url,
    method: Method, // One of POST or GET
    transport: Transport,
    timeout: Duration,
    ids: Arc<IdGenerator>,
}

impl DoHClient {
    /// Creates a new Client for the first of `servers`.
    ///
    /// Be aware that the servers will typically be in the form of `https://domain_name/`. That
    /// `domain_name` will be resolved by the system's standard DNS library.
    pub fn new<A: ToUrls>(servers: A, method: Method) -> Result<Self> {
        match method {
            Method::GET | Method::POST => (), // Nothing,
            _ => bail!(InvalidInput, "only GET and POST allowed"),
        }

        let server = match servers.to_urls()?.next() {
            Some(server) => server,
            None => bail!(InvalidInput, "no DoH server given"),
        };

        let transport = match server.scheme() {
            "https" => Transport::Alpn(
                HyperClient::builder()
                    .pool_idle_timeout(Duration::from_secs(30))
                    .http2_only(true)
                    .build::<_, Body>(AlpnConnector::new()),
            ),
            "http" => Transport::Plain(HyperClient::new()),
            scheme => bail!(InvalidInput, "unsupported DoH scheme '{}'", scheme),
        };

        Ok(Self {
            server,
            method,
            transport,
            timeout: DEFAULT_TIMEOUT,
            ids: Arc::new(IdGenerator::new()),
        })
    }

    /// Shares an id generator with other clients.
    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    fn request(&self, p: Vec<u8>) -> Result<Request<Body>> {
        // Base request common to both GET and POST
        let req = Request::builder()
            .method(&self.method)
            .header(ACCEPT, CONTENT_TYPE_APPLICATION_DNS_MESSAGE);

        let req = match self.method {
            Method::GET => {
                // Encode the message as a base64 string
                let mut buf = String::new();
                base64::encode_config_buf(p, base64::URL_SAFE_NO_PAD, &mut buf);

                // and add to the query params.
                let mut url = self.server.clone();
                url.query_pairs_mut().append_pair(DNS_QUERY_PARAM, &buf);

                // We have to do this wierd as_str().parse() thing because the
                // http::Uri doesn't provide a way to easily mutate or construct it.
                let uri: hyper::Uri = url.as_str().parse()?;
                req.uri(uri).body(Body::empty())?
            }
            Method::POST => req
                .uri(self.server.as_str())
                .header(CONTENT_TYPE, CONTENT_TYPE_APPLICATION_DNS_MESSAGE)
                .body(Body::from(p))?, // content-length header will be added.
            _ => bail!(InvalidInput, "only GET and POST allowed"),
        };

        Ok(req)
    }

    async fn send(&self, req: Request<Body>) -> Result<Response<Body>> {
        Ok(match &self.transport {
            Transport::Alpn(client) => client.request(req).await?,
            Transport::Plain(client) => client.request(req).await?,
        })
    }

    /// Sends the request and returns the response body, if the response is
    /// a DNS message.
    async fn exchange(&self, req: Request<Body>) -> Result<(Vec<u8>, SocketAddr)> {
        let resp = self.send(req).await?;

        if resp.status() != StatusCode::OK {
            return Err(Error::InvalidMessage(format!(
                "received unexpected HTTP status code: {}",
                resp.status()
            )));
        }

        match resp.headers().get(CONTENT_TYPE) {
            Some(content_type)
                if content_type_equal(content_type, CONTENT_TYPE_APPLICATION_DNS_MESSAGE) => {}
            content_type => {
                return Err(Error::InvalidMessage(format!(
                    "received invalid content-type: {:?} expected {}",
                    content_type, CONTENT_TYPE_APPLICATION_DNS_MESSAGE,
                )))
            }
        }

        // Get connection information (if available)
        let remote_addr = match resp.extensions().get::<HttpInfo>() {
            Some(http_info) => http_info.remote_addr(),
            None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };

        // TODO Refuse bodies longer than 65535 bytes before reading them in full.
        let body = hyper::body::to_bytes(resp.into_body()).await?;
        if body.len() < HEADER_LEN {
            return Err(Error::InvalidMessage(format!(
                "{} byte response is too short",
                body.len()
            )));
        }

        Ok((body.to_vec(), remote_addr))
    }
}

#[async_trait]
impl Exchanger for DoHClient {
    /// Sends the [`Message`] to the `server` via HTTP and returns the result.
    async fn query(&mut self, query: &Message) -> Result<Message> {
        // The id is always zero, so responses are more cacheable (rfc8484 section 4.1).
        let mut zeroed = query.clone();
        zeroed.id = 0;

        let p = zeroed.to_vec()?;
        let stats = StatsBuilder::start(p.len());
        let req = self.request(p)?;

        let (body, remote_addr) = with_timeout(self.timeout, self.exchange(req)).await?;

        let mut resp = decode_response(&zeroed, &body)?;
        resp.set_id(query.id);
        resp.stats = Some(stats.end(remote_addr, body.len()));
        Ok(resp)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn next_id(&self) -> u16 {
        self.ids.next()
    }
}
