use crate::clients::{read_message, write_message};
use crate::server::handler::Handler;
use crate::server::request::{ChannelWriter, Transport};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// How long a connection may sit without sending a query.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts connections until stopped, serving each on its own task.
pub(crate) async fn serve(listener: TcpListener, handler: Arc<Handler>, mut stop: watch::Receiver<bool>) {
    let local = listener.local_addr().ok();

    loop {
        let (stream, peer) = tokio::select! {
            _ = stop.changed() => break,
            result = listener.accept() => match result {
                Ok(result) => result,
                Err(e) => {
                    warn!("TCP accept failed: {}", e);
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        tokio::spawn(serve_connection(
            stream,
            peer,
            Transport::Tcp,
            handler.clone(),
            stop.clone(),
        ));
    }

    info!("TCP listener on {:?} closed", local);
}

/// Serves length prefixed queries from one connection, answering each
/// before reading the next. Used for both TCP and DoT.
pub(crate) async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    transport: Transport,
    handler: Arc<Handler>,
    mut stop: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    debug!("{} connection from {}", transport, peer);

    loop {
        let packet = tokio::select! {
            _ = stop.changed() => break,
            result = tokio::time::timeout(IDLE_TIMEOUT, read_message(&mut stream)) => match result {
                Ok(Ok(Some(packet))) => packet,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    debug!("failed to read from {}: {}", peer, e);
                    break;
                }
                Err(_) => {
                    debug!("closing idle connection from {}", peer);
                    break;
                }
            },
        };

        let (writer, rx) = ChannelWriter::new();
        handler
            .handle_packet(&packet, transport, peer, Box::new(writer))
            .await;

        // The sender is dropped unanswered if the query is too broken to reply to.
        let response = match rx.await {
            Ok(response) => response,
            Err(_) => break,
        };

        if let Err(e) = write_message(&mut stream, &response).await {
            debug!("failed to write to {}: {}", peer, e);
            break;
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!("failed to shut down connection from {}: {}", peer, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Answer, Cache};
    use crate::{Class, Message, Question, Rcode, Record, Resource, Type};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_multiple_queries() {
        let cache = Arc::new(Cache::default());
        let question = Question::new("example.com", Type::A, Class::Internet);

        let mut answer = Message::query(question.clone(), 0, false).response(Rcode::NoError);
        answer.aa = true;
        answer.answers.push(Record::new(
            "example.com",
            Class::Internet,
            60,
            Resource::A("192.0.2.1".parse().unwrap()),
        ));
        answer.pack().unwrap();
        cache.upsert(Answer::local(question.clone(), answer));

        let (handler, _receivers, _) = Handler::new(cache, 8);
        let (_stop_tx, stop) = watch::channel(false);

        let (client, server) = tokio::io::duplex(4096);
        let peer = "192.0.2.1:1234".parse().unwrap();
        let task = tokio::spawn(serve_connection(server, peer, Transport::Tcp, Arc::new(handler), stop));

        let (mut r, mut w) = tokio::io::split(client);
        for id in [1, 2, 3] {
            let query = Message::query(question.clone(), id, true);
            write_message(&mut w, &query.to_vec().unwrap()).await.unwrap();

            let response = read_message(&mut r).await.unwrap().unwrap();
            let response = Message::from_slice(&response).unwrap();
            assert_eq!(response.id, id);
            assert!(response.aa);
            assert_eq!(response.answers.len(), 1);
        }

        drop(w);
        drop(r);
        task.await.unwrap();
    }
}
