use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::config::ListenConfig;
use crate::dns::packet::{self, DnsHeader, DnsPacket, DnsRecord};
use crate::dns::types::{DnsClass, RecordType, ResponseCode};
use crate::resolver::Resolver;

/// Inbound DNS listener pair (UDP + TCP on the same address)
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    resolver: Arc<Resolver>,
    packet_size: usize,
}

impl DnsServer {
    /// Bind both transports. Startup is all-or-nothing: a TCP bind
    /// failure releases the already-bound UDP socket.
    pub async fn bind(listen: &ListenConfig, resolver: Arc<Resolver>) -> anyhow::Result<Self> {
        let bind_addr = format!("{}:{}", listen.address, listen.port);
        let udp = UdpSocket::bind(&bind_addr).await?;
        let tcp = match TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                drop(udp);
                return Err(e.into());
            }
        };
        info!("Listening on {} (UDP + TCP)", bind_addr);

        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            resolver,
            packet_size: listen.packet_size,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// TCP listener address. Differs from `local_addr` only when binding
    /// to port 0.
    pub fn tcp_local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Serve until the socket dies. The TCP accept loop runs on its own
    /// task; the UDP loop runs here.
    pub async fn run(self) -> anyhow::Result<()> {
        let tcp_resolver = self.resolver.clone();
        let tcp = self.tcp;
        tokio::spawn(async move {
            loop {
                match tcp.accept().await {
                    Ok((stream, addr)) => {
                        let resolver = tcp_resolver.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_tcp_connection(stream, addr, resolver).await {
                                warn!("TCP handler error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("TCP accept error: {}", e),
                }
            }
        });

        // UDP loop. A bad datagram is dropped, never the listener.
        let mut buf = vec![0u8; self.packet_size];
        loop {
            let (len, addr) = self.udp.recv_from(&mut buf).await?;
            let data = buf[..len].to_vec();
            let socket = self.udp.clone();
            let resolver = self.resolver.clone();
            tokio::spawn(async move {
                let request = match packet::parse_packet(&data) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Dropping undecodable datagram from {}: {}", addr, e);
                        return;
                    }
                };
                let response = process_query(&resolver, &request).await;
                if let Err(e) = socket.send_to(&packet::encode_packet(&response), addr).await {
                    warn!("Failed to send response to {}: {}", addr, e);
                }
            });
        }
    }
}

/// One task per TCP connection; messages on a connection are handled
/// strictly in order
async fn handle_tcp_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    resolver: Arc<Resolver>,
) -> anyhow::Result<()> {
    debug!("TCP connection from {}", addr);

    while let Some(data) = packet::read_framed(&mut stream).await? {
        let request = packet::parse_packet(&data)?;
        let response = process_query(&resolver, &request).await;
        packet::write_framed(&mut stream, &packet::encode_packet(&response)).await?;
    }

    Ok(())
}

/// Build an authoritative response: every IN/A question gets the
/// resolver's answers appended as resource records
pub async fn process_query(resolver: &Resolver, request: &DnsPacket) -> DnsPacket {
    let mut answers = Vec::new();

    for question in &request.questions {
        if question.qclass != DnsClass::IN || question.qtype != RecordType::A {
            continue;
        }
        for answer in resolver.resolve(&question.name).await {
            answers.push(DnsRecord {
                name: answer.name,
                rtype: answer.rtype,
                rclass: DnsClass::IN,
                ttl: answer.ttl,
                rdata: answer.rdata,
            });
        }
    }

    DnsPacket {
        header: DnsHeader {
            id: request.header.id,
            qr: true,
            opcode: request.header.opcode,
            aa: true,
            tc: false,
            rd: request.header.rd,
            ra: false,
            z: 0,
            rcode: ResponseCode::NoError,
        },
        questions: request.questions.clone(),
        answers,
        authorities: Vec::new(),
        additionals: Vec::new(),
    }
}
