use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::DnsClient;
use crate::config::{Config, HealthCheckConfig};
use crate::dns::types::RecordType;
use crate::domain_tree::DomainTree;
use crate::health::{HealthRegistry, ProbeConfig};

/// Per-domain answer configuration, attached to its trie node at startup
/// and immutable afterwards
pub struct DomainController {
    pub static_ips: Vec<IpAddr>,
    pub downstream: Vec<SocketAddr>,
    pub ttl: u32,
}

/// One answer record produced by resolution
#[derive(Debug, Clone)]
pub struct Answer {
    pub name: String,
    pub rtype: RecordType,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// Turns a query name into answer records: health-filtered static IPs
/// first, then answers forwarded from downstream servers.
pub struct Resolver {
    domains: DomainTree<DomainController>,
    registry: Arc<HealthRegistry>,
    client: Arc<DnsClient>,
}

fn probe_from_config(check: &HealthCheckConfig) -> anyhow::Result<ProbeConfig> {
    if let Some(http) = &check.http {
        return Ok(ProbeConfig::Http {
            method: http.method.clone(),
            url: http.url.clone(),
            expect_status: http.expect_status,
            interval: Duration::from_secs(http.interval_secs),
            timeout: Duration::from_secs(http.timeout_secs),
        });
    }
    if let Some(tcp) = &check.tcp {
        return Ok(ProbeConfig::Tcp {
            address: tcp.address,
            interval: Duration::from_secs(tcp.interval_secs),
            timeout: Duration::from_secs(tcp.timeout_secs),
        });
    }
    Err(anyhow::anyhow!("health check has neither http nor tcp probe"))
}

impl Resolver {
    /// Build the domain index from configuration and register every
    /// configured health check
    pub fn new(config: &Config, registry: Arc<HealthRegistry>, client: Arc<DnsClient>) -> anyhow::Result<Self> {
        for entry in &config.ips {
            let Some(check) = &entry.health_check else {
                continue;
            };
            let address: IpAddr = entry
                .ip
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid health-checked IP '{}': {}", entry.ip, e))?;
            if !registry.register(address, probe_from_config(check)?) {
                warn!("{} is already registered, keeping its existing health check", address);
            }
        }

        let mut domains = DomainTree::new();
        for record in &config.records {
            let static_ips = record
                .ips
                .iter()
                .map(|ip| {
                    ip.parse::<IpAddr>()
                        .map_err(|e| anyhow::anyhow!("Invalid IP '{}' for domain {}: {}", ip, record.domain, e))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let node = domains.insert(&record.domain);
            domains.set_value(
                node,
                DomainController {
                    static_ips,
                    downstream: record.downstream.clone(),
                    ttl: record.ttl_secs,
                },
            );
            info!(
                "Serving {} ({} static IPs, {} downstream)",
                record.domain,
                record.ips.len(),
                record.downstream.len()
            );
        }

        Ok(Self {
            domains,
            registry,
            client,
        })
    }

    /// Resolve a query name to its answer set. An unknown name yields an
    /// empty set, not an error.
    pub async fn resolve(&self, name: &str) -> Vec<Answer> {
        let Some(controller) = self.domains.get(name) else {
            debug!("No record for {}", name);
            return Vec::new();
        };

        let mut answers = Vec::new();

        for ip in &controller.static_ips {
            // Fail-open: an address without a registered check counts as
            // healthy
            if self.registry.status(ip) == Some(false) {
                debug!("Skipping unhealthy {} for {}", ip, name);
                continue;
            }
            let (rtype, rdata) = match ip {
                IpAddr::V4(v4) => (RecordType::A, v4.octets().to_vec()),
                IpAddr::V6(v6) => (RecordType::AAAA, v6.octets().to_vec()),
            };
            answers.push(Answer {
                name: name.to_string(),
                rtype,
                ttl: controller.ttl,
                rdata,
            });
        }

        // Downstream servers are queried one at a time; a server that
        // fails or times out simply contributes nothing
        for server in &controller.downstream {
            match self.client.query(name, *server).await {
                Ok(response) => {
                    for record in response.answers {
                        answers.push(Answer {
                            name: record.name,
                            rtype: record.rtype,
                            ttl: record.ttl,
                            rdata: record.rdata,
                        });
                    }
                }
                Err(e) => {
                    warn!("Downstream {} failed for {}: {}", server, name, e);
                }
            }
        }

        answers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dns::packet::{encode_packet, parse_packet, DnsRecord};
    use crate::dns::types::DnsClass;
    use tokio::net::UdpSocket;

    async fn test_client() -> Arc<DnsClient> {
        Arc::new(DnsClient::new(Duration::from_millis(500)).await.unwrap())
    }

    fn config(toml: &str) -> Config {
        Config::parse(toml).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_name_yields_empty() {
        let cfg = config(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353
            "#,
        );
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry, test_client().await).unwrap();
        assert!(resolver.resolve("nothing.example.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_fail_open_without_health_check() {
        let cfg = config(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[records]]
            domain = "svc.example.com"
            ips = ["10.0.0.1"]
            ttl_secs = 30
            "#,
        );
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry, test_client().await).unwrap();

        let answers = resolver.resolve("svc.example.com").await;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].rtype, RecordType::A);
        assert_eq!(answers[0].rdata, vec![10, 0, 0, 1]);
        assert_eq!(answers[0].ttl, 30);
    }

    #[tokio::test]
    async fn test_failing_check_excludes_ip() {
        let cfg = config(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[records]]
            domain = "svc.example.com"
            ips = ["10.0.0.1"]

            [[ips]]
            ip = "10.0.0.1"
            [ips.health_check.tcp]
            address = "127.0.0.1:1"
            interval_secs = 3600
            timeout_secs = 1
            "#,
        );
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry.clone(), test_client().await).unwrap();

        // Initial state is unhealthy and port 1 never answers
        assert!(resolver.resolve("svc.example.com").await.is_empty());

        // Let the first (failing) probe run land before overriding it
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Flipping the flag restores the answer
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        registry.set_status_for_test(&ip, true);
        assert_eq!(resolver.resolve("svc.example.com").await.len(), 1);

        registry.shutdown();
    }

    #[tokio::test]
    async fn test_ipv6_answers_are_aaaa() {
        let cfg = config(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[records]]
            domain = "svc.example.com"
            ips = ["fd00::1"]
            "#,
        );
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry, test_client().await).unwrap();

        let answers = resolver.resolve("svc.example.com").await;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].rtype, RecordType::AAAA);
        assert_eq!(answers[0].rdata.len(), 16);
    }

    #[tokio::test]
    async fn test_wildcard_and_exact_records() {
        let cfg = config(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[records]]
            domain = "*.example.com"
            ips = ["10.0.0.9"]

            [[records]]
            domain = "api.example.com"
            ips = ["10.0.0.2"]
            "#,
        );
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry, test_client().await).unwrap();

        assert_eq!(resolver.resolve("api.example.com").await[0].rdata, vec![10, 0, 0, 2]);
        assert_eq!(resolver.resolve("web.example.com").await[0].rdata, vec![10, 0, 0, 9]);
        // No record at the parent level itself
        assert!(resolver.resolve("example.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_downstream_answers_appended_in_order() {
        // Loopback downstream returning two A records and one AAAA
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let downstream = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let (len, peer) = match socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let mut response = parse_packet(&buf[..len]).unwrap();
                response.header.qr = true;
                let name = response.questions[0].name.clone();
                for rdata in [vec![192, 0, 2, 10], vec![192, 0, 2, 11]] {
                    response.answers.push(DnsRecord {
                        name: name.clone(),
                        rtype: RecordType::A,
                        rclass: DnsClass::IN,
                        ttl: 120,
                        rdata,
                    });
                }
                response.answers.push(DnsRecord {
                    name: name.clone(),
                    rtype: RecordType::AAAA,
                    rclass: DnsClass::IN,
                    ttl: 120,
                    rdata: vec![0; 16],
                });
                let _ = socket.send_to(&encode_packet(&response), peer).await;
            }
        });

        let cfg = config(&format!(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[records]]
            domain = "svc.example.com"
            ips = ["10.0.0.1"]
            downstream = ["{}"]
            ttl_secs = 30
            "#,
            downstream
        ));
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry, test_client().await).unwrap();

        let answers = resolver.resolve("svc.example.com").await;
        assert_eq!(answers.len(), 4);
        // Static answer first, then the downstream's answers in response order
        assert_eq!(answers[0].rdata, vec![10, 0, 0, 1]);
        assert_eq!(answers[0].ttl, 30);
        assert_eq!(answers[1].rdata, vec![192, 0, 2, 10]);
        assert_eq!(answers[2].rdata, vec![192, 0, 2, 11]);
        assert_eq!(answers[3].rtype, RecordType::AAAA);
        assert_eq!(answers[3].ttl, 120);
    }

    #[tokio::test]
    async fn test_unreachable_downstream_contributes_nothing() {
        // Socket that never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let downstream = silent.local_addr().unwrap();

        let cfg = config(&format!(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[records]]
            domain = "svc.example.com"
            ips = ["10.0.0.1"]
            downstream = ["{}"]
            "#,
            downstream
        ));
        let registry = Arc::new(HealthRegistry::new().unwrap());
        let resolver = Resolver::new(&cfg, registry, test_client().await).unwrap();

        let answers = resolver.resolve("svc.example.com").await;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].rdata, vec![10, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_duplicate_health_registration_keeps_original() {
        let cfg = config(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 5353

            [[ips]]
            ip = "10.0.0.1"
            [ips.health_check.tcp]
            address = "127.0.0.1:1"
            interval_secs = 3600

            [[ips]]
            ip = "10.0.0.1"
            [ips.health_check.tcp]
            address = "127.0.0.1:2"
            interval_secs = 3600
            "#,
        );
        let registry = Arc::new(HealthRegistry::new().unwrap());
        // Second registration is rejected, startup still succeeds
        let _resolver = Resolver::new(&cfg, registry.clone(), test_client().await).unwrap();
        assert_eq!(registry.len(), 1);
        registry.shutdown();
    }
}
