use crate::server::handler::Handler;
use crate::server::request::{Transport, UdpWriter};
use log::{info, warn};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Reads queries off the socket until stopped. Each is handled on its own
/// task, so a query waiting on an upstream doesn't hold up the rest.
pub(crate) async fn serve(socket: UdpSocket, handler: Arc<Handler>, mut stop: watch::Receiver<bool>) {
    let socket = Arc::new(socket);
    let local = socket.local_addr().ok();

    // Queries are small, but read the largest datagram so nothing is cut short.
    let mut buf = vec![0; u16::MAX as usize];

    loop {
        let (n, peer) = tokio::select! {
            _ = stop.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(result) => result,
                Err(e) => {
                    // Typically an ICMP unreachable from a previous send.
                    warn!("UDP receive failed: {}", e);
                    continue;
                }
            },
        };

        let packet = buf[..n].to_vec();
        let writer = UdpWriter {
            socket: socket.clone(),
            peer,
        };
        let handler = handler.clone();

        tokio::spawn(async move {
            handler
                .handle_packet(&packet, Transport::Udp, peer, Box::new(writer))
                .await;
        });
    }

    info!("UDP listener on {:?} closed", local);
}
