use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::dns::packet::{self, DnsPacket};
use crate::dns::types::RecordType;

type PendingMap = Arc<Mutex<HashMap<u16, oneshot::Sender<DnsPacket>>>>;

/// Outbound DNS client. All UDP queries share one socket; a background
/// receive loop routes responses back to the waiting caller by
/// transaction id.
pub struct DnsClient {
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    recv_task: JoinHandle<()>,
    timeout: Duration,
}

impl DnsClient {
    pub async fn new(timeout: Duration) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let recv_task = tokio::spawn(recv_loop(socket.clone(), pending.clone()));

        Ok(Self {
            socket,
            pending,
            recv_task,
            timeout,
        })
    }

    /// Send a query over the shared socket and wait (bounded) for the
    /// response with the matching transaction id.
    pub async fn send_request(&self, request: &DnsPacket, server: SocketAddr) -> anyhow::Result<DnsPacket> {
        let id = request.header.id;
        let (tx, rx) = oneshot::channel();

        // Register the waiter before sending so the response can't slip
        // past the receive loop unmatched. A colliding in-flight id is
        // superseded; the older caller errors out instead of waiting on a
        // response that will never reach it.
        if let Some(old) = self.pending.lock().insert(id, tx) {
            drop(old);
            warn!("Transaction id {:#06x} reused while in flight", id);
        }

        let bytes = packet::encode_packet(request);
        if let Err(e) = self.socket.send_to(&bytes, server).await {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(anyhow::anyhow!(
                "Query {:#06x} to {} was superseded or the receive loop stopped",
                id,
                server
            )),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(anyhow::anyhow!(
                    "No response from {} within {:?}",
                    server,
                    self.timeout
                ))
            }
        }
    }

    /// Build and send a single-question A query with a fresh random
    /// transaction id
    pub async fn query(&self, name: &str, server: SocketAddr) -> anyhow::Result<DnsPacket> {
        let request = packet::build_query(rand::random(), name, RecordType::A, true);
        self.send_request(&request, server).await
    }

    /// One-shot DNS-over-TCP exchange on a dedicated connection. No shared
    /// state; only one message is ever in flight on the stream.
    pub async fn send_request_tcp(&self, request: &DnsPacket, server: SocketAddr) -> anyhow::Result<DnsPacket> {
        let mut stream = TcpStream::connect(server).await?;
        packet::write_framed(&mut stream, &packet::encode_packet(request)).await?;
        let bytes = packet::read_framed(&mut stream)
            .await?
            .ok_or_else(|| anyhow::anyhow!("{} closed the connection before responding", server))?;
        packet::parse_packet(&bytes)
    }

    /// Stop the background receive loop
    pub fn shutdown(&self) {
        self.recv_task.abort();
    }
}

impl Drop for DnsClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, pending: PendingMap) {
    let mut buf = vec![0u8; 4096];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                error!("Outbound socket recv error: {}", e);
                break;
            }
        };

        let response = match packet::parse_packet(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                warn!("Discarding undecodable response: {}", e);
                continue;
            }
        };

        let waiter = pending.lock().remove(&response.header.id);
        match waiter {
            Some(tx) => {
                // Caller may have timed out between removal and send
                let _ = tx.send(response);
            }
            None => {
                debug!("Discarding response with unknown id {:#06x}", response.header.id);
            }
        }
    }
}
