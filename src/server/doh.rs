use crate::clients::mime::content_type_equal;
use crate::clients::{CONTENT_TYPE_APPLICATION_DNS_MESSAGE, DNS_QUERY_PARAM};
use crate::dns::HEADER_LEN;
use crate::server::handler::Handler;
use crate::server::request::{ChannelWriter, Transport};
use crate::server::tls::HANDSHAKE_TIMEOUT;
use http::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode, Uri};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::Body;
use log::{debug, info, warn};
use rustls::ServerConfig;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

/// The only path queries are accepted on (rfc8484 section 4.1).
pub(crate) const DOH_PATH: &str = "/dns-query";

/// Accepts DNS-over-HTTPS connections until stopped. Without a TLS config
/// the listener speaks plain HTTP, which is only useful behind a proxy.
pub(crate) async fn serve(
    listener: TcpListener,
    config: Option<Arc<ServerConfig>>,
    handler: Arc<Handler>,
    mut stop: watch::Receiver<bool>,
) {
    let local = listener.local_addr().ok();

    let acceptor = config.map(|config| {
        let mut config = (*config).clone();
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        TlsAcceptor::from(Arc::new(config))
    });

    loop {
        let (stream, peer) = tokio::select! {
            _ = stop.changed() => break,
            result = listener.accept() => match result {
                Ok(result) => result,
                Err(e) => {
                    warn!("DoH accept failed: {}", e);
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let handler = handler.clone();
        let stop = stop.clone();

        tokio::spawn(async move {
            let acceptor = match acceptor {
                Some(acceptor) => acceptor,
                None => return serve_http(stream, peer, handler, stop).await,
            };

            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(stream)) => serve_http(stream, peer, handler, stop).await,
                Ok(Err(e)) => debug!("TLS handshake with {} failed: {}", peer, e),
                Err(_) => debug!("TLS handshake with {} timed out", peer),
            }
        });
    }

    info!("DoH listener on {:?} closed", local);
}

/// Serves HTTP/1.1 or HTTP/2 on one connection.
async fn serve_http<S>(stream: S, peer: SocketAddr, handler: Arc<Handler>, mut stop: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(respond(&handler, peer, req).await) }
    });

    tokio::select! {
        result = Http::new().serve_connection(stream, service) => {
            if let Err(e) = result {
                debug!("HTTP connection from {} failed: {}", peer, e);
            }
        }
        _ = stop.changed() => (),
    }
}

fn status(code: StatusCode, reason: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(format!("{}\n", reason)));
    *resp.status_mut() = code;
    resp
}

/// The base64url decoded `dns` query parameter. Padding is tolerated,
/// although clients should leave it off.
fn dns_param(uri: &Uri) -> Option<Vec<u8>> {
    let query = uri.query()?;
    let (_, value) = url::form_urlencoded::parse(query.as_bytes()).find(|(k, _)| k == DNS_QUERY_PARAM)?;
    base64::decode_config(value.trim_end_matches('='), base64::URL_SAFE_NO_PAD).ok()
}

/// Turns one HTTP request into a query, and its answer into a response.
async fn respond(handler: &Handler, peer: SocketAddr, req: Request<Body>) -> Response<Body> {
    if req.uri().path() != DOH_PATH {
        return status(StatusCode::NOT_FOUND, "not found");
    }

    let packet = match *req.method() {
        Method::GET => match dns_param(req.uri()) {
            Some(packet) => packet,
            None => return status(StatusCode::BAD_REQUEST, "missing or invalid dns parameter"),
        },
        Method::POST => {
            match req.headers().get(CONTENT_TYPE) {
                Some(content_type)
                    if content_type_equal(content_type, CONTENT_TYPE_APPLICATION_DNS_MESSAGE) => {}
                _ => {
                    return status(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        "expected content-type application/dns-message",
                    )
                }
            }

            match hyper::body::to_bytes(req.into_body()).await {
                Ok(body) => body.to_vec(),
                Err(e) => return status(StatusCode::BAD_REQUEST, &e.to_string()),
            }
        }
        _ => {
            let mut resp = status(StatusCode::METHOD_NOT_ALLOWED, "only GET and POST are allowed");
            resp.headers_mut()
                .insert(ALLOW, http::HeaderValue::from_static("GET, POST"));
            return resp;
        }
    };

    if packet.len() < HEADER_LEN || packet.len() > u16::MAX as usize {
        return status(StatusCode::BAD_REQUEST, "invalid DNS message");
    }

    let (writer, rx) = ChannelWriter::new();
    handler
        .handle_packet(&packet, Transport::Https, peer, Box::new(writer))
        .await;

    let body = match rx.await {
        Ok(body) => body,
        Err(_) => return status(StatusCode::SERVICE_UNAVAILABLE, "no answer"),
    };

    let mut resp = Response::new(Body::from(body));
    resp.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static(CONTENT_TYPE_APPLICATION_DNS_MESSAGE),
    );
    resp.headers_mut()
        .insert(CACHE_CONTROL, http::HeaderValue::from_static("no-cache"));
    resp
}
