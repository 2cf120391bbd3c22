use crate::server::handler::Handler;
use crate::server::request::Transport;
use crate::server::tcp::serve_connection;
use crate::Error;
use crate::Result;
use log::{debug, info, warn};
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::Item;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

/// How long a client has to complete the TLS handshake.
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Loads a PEM certificate chain and private key into a server config.
pub fn server_config(cert: &Path, key: &Path) -> Result<Arc<ServerConfig>> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    };

    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut open(cert)?)?
        .into_iter()
        .map(Certificate)
        .collect();
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "{}: no certificates found",
            cert.display()
        )));
    }

    let mut reader = open(key)?;
    let key = loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(Item::PKCS8Key(key)) | Some(Item::RSAKey(key)) | Some(Item::ECKey(key)) => {
                break PrivateKey(key)
            }
            Some(_) => continue,
            None => {
                return Err(Error::Config(format!(
                    "{}: no private key found",
                    key.display()
                )))
            }
        }
    };

    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Accepts DNS-over-TLS connections until stopped.
pub(crate) async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    handler: Arc<Handler>,
    mut stop: watch::Receiver<bool>,
) {
    let local = listener.local_addr().ok();
    let acceptor = TlsAcceptor::from(config);

    loop {
        let (stream, peer) = tokio::select! {
            _ = stop.changed() => break,
            result = listener.accept() => match result {
                Ok(result) => result,
                Err(e) => {
                    warn!("DoT accept failed: {}", e);
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let handler = handler.clone();
        let stop = stop.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(stream)) => serve_connection(stream, peer, Transport::Tls, handler, stop).await,
                Ok(Err(e)) => debug!("TLS handshake with {} failed: {}", peer, e),
                Err(_) => debug!("TLS handshake with {} timed out", peer),
            }
        });
    }

    info!("DoT listener on {:?} closed", local);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");

        let empty = dir.path().join("empty.pem");
        File::create(&empty).unwrap();

        let not_pem = dir.path().join("not.pem");
        writeln!(File::create(&not_pem).unwrap(), "hello").unwrap();

        assert!(matches!(server_config(&missing, &missing), Err(Error::Config(_))));
        assert!(matches!(server_config(&empty, &empty), Err(Error::Config(_))));
        assert!(matches!(server_config(&not_pem, &not_pem), Err(Error::Config(_))));
    }
}
