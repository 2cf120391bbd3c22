use crate::clients::stream::{connect_tcp, StreamClient};
use crate::clients::DEFAULT_TIMEOUT;
use crate::Error;
use crate::Result;
use log::warn;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A DNS over TLS (DoT) Client (rfc7858). Queries are length prefixed, as
/// for TCP, over the encrypted stream.
///
/// # Example
///
/// ```rust,no_run
/// use rdns::clients::{Exchanger, TlsClient};
/// use rdns::{Class, Question, Type};
///
/// #[tokio::main]
/// async fn main() -> Result<(), rdns::Error> {
///     let server = "1.1.1.1:853".parse().unwrap();
///     let mut client = TlsClient::connect(server, "cloudflare-dns.com", false).await?;
///
///     let question = Question::new("bramp.net", Type::A, Class::Internet);
///     println!("{}", client.lookup(question, true).await?);
///     Ok(())
/// }
/// ```
pub type TlsClient = StreamClient<TlsStream<TcpStream>>;

/// Accepts any certificate, for upstreams with self signed certificates.
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Builds a client config trusting the webpki roots, or trusting anything
/// if `insecure` is set.
pub(crate) fn client_config(insecure: bool) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if insecure {
        warn!("upstream TLS certificates will not be verified");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Arc::new(config)
}

/// The name the upstream's certificate is checked against. IP literals are
/// matched against the certificate's IP addresses.
pub(crate) fn server_name(host: &str) -> Result<ServerName> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse() {
        return Ok(ServerName::IpAddress(ip));
    }

    ServerName::try_from(host)
        .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid TLS server name", host)))
}

impl StreamClient<TlsStream<TcpStream>> {
    /// Connects to `server` and completes the TLS handshake, checking the
    /// certificate is for `host` unless `insecure` is set.
    pub async fn connect(server: SocketAddr, host: &str, insecure: bool) -> Result<Self> {
        Self::connect_with(server, host, client_config(insecure)).await
    }

    pub(crate) async fn connect_with(
        server: SocketAddr,
        host: &str,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        let name = server_name(host)?;
        let stream = connect_tcp(server, DEFAULT_TIMEOUT).await?;

        let stream = crate::clients::with_timeout(DEFAULT_TIMEOUT, async {
            Ok(TlsConnector::from(config).connect(name, stream).await?)
        })
        .await?;

        Ok(Self::new(server, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_server_name() {
        assert_eq!(
            server_name("192.0.2.1").unwrap(),
            ServerName::IpAddress("192.0.2.1".parse().unwrap())
        );
        assert_eq!(
            server_name("[2001:db8::1]").unwrap(),
            ServerName::IpAddress("2001:db8::1".parse().unwrap())
        );
        assert_eq!(
            server_name("dns.google").unwrap(),
            ServerName::try_from("dns.google").unwrap()
        );
        assert!(server_name("not a name").is_err());
    }

    #[test]
    fn test_client_config() {
        assert!(client_config(false).alpn_protocols.is_empty());
        client_config(true);
    }
}
