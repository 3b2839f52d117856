use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub records: Vec<RecordConfig>,
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    /// Bound on the wait for a forwarded query's response
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenConfig {
    pub address: String,
    pub port: u16,
    /// UDP receive buffer size, bytes
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    AllHealthy,
    RoundRobinHealthy,
    FirstHealthy,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::AllHealthy
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecordConfig {
    pub domain: String,
    #[serde(default)]
    pub ips: Vec<String>,
    /// Downstream DNS servers queried in order after the static answers
    #[serde(default)]
    pub downstream: Vec<SocketAddr>,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u32,
    /// Accepted for forward compatibility; resolution currently always
    /// returns every healthy IP (all_healthy)
    #[serde(default)]
    pub policy: Policy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IpConfig {
    pub ip: String,
    pub health_check: Option<HealthCheckConfig>,
}

/// Exactly one of `http` / `tcp` must be set
#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheckConfig {
    pub http: Option<HttpCheckConfig>,
    pub tcp: Option<TcpCheckConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpCheckConfig {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub url: String,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
    #[serde(default = "default_check_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TcpCheckConfig {
    pub address: SocketAddr,
    #[serde(default = "default_check_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_packet_size() -> usize { 1500 }
fn default_ttl() -> u32 { 30 }
fn default_query_timeout() -> u64 { 5 }
fn default_http_method() -> String { "GET".to_string() }
fn default_expect_status() -> u16 { 200 }
fn default_check_interval() -> u64 { 10 }
fn default_check_timeout() -> u64 { 30 }

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse(&content).map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.listen.packet_size < 100 {
            return Err(anyhow::anyhow!(
                "listen.packet_size must be at least 100 (got {})",
                self.listen.packet_size
            ));
        }
        for ip in &self.ips {
            if let Some(check) = &ip.health_check {
                match (&check.http, &check.tcp) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => {
                        return Err(anyhow::anyhow!(
                            "health_check for {} must set exactly one of http/tcp",
                            ip.ip
                        ))
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [listen]
            address = "0.0.0.0"
            port = 5353

            [[records]]
            domain = "svc.example.com"
            ips = ["10.0.0.1", "fd00::1"]
            downstream = ["192.0.2.1:53"]
            ttl_secs = 60
            policy = "all_healthy"

            [[ips]]
            ip = "10.0.0.1"
            [ips.health_check.tcp]
            address = "10.0.0.1:80"
            interval_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.packet_size, 1500);
        assert_eq!(config.records.len(), 1);
        assert_eq!(config.records[0].ttl_secs, 60);
        assert_eq!(config.records[0].policy, Policy::AllHealthy);
        let check = config.ips[0].health_check.as_ref().unwrap();
        let tcp = check.tcp.as_ref().unwrap();
        assert_eq!(tcp.interval_secs, 5);
        assert_eq!(tcp.timeout_secs, 30);
    }

    #[test]
    fn test_rejects_small_packet_size() {
        let err = Config::parse(
            r#"
            [listen]
            address = "0.0.0.0"
            port = 53
            packet_size = 50
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("packet_size"));
    }

    #[test]
    fn test_rejects_ambiguous_health_check() {
        let err = Config::parse(
            r#"
            [listen]
            address = "0.0.0.0"
            port = 53

            [[ips]]
            ip = "10.0.0.1"
            [ips.health_check.tcp]
            address = "10.0.0.1:80"
            [ips.health_check.http]
            url = "http://10.0.0.1/health"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_http_check_defaults() {
        let config = Config::parse(
            r#"
            [listen]
            address = "127.0.0.1"
            port = 53

            [[ips]]
            ip = "10.0.0.1"
            [ips.health_check.http]
            url = "http://10.0.0.1/health"
            "#,
        )
        .unwrap();
        let http = config.ips[0].health_check.as_ref().unwrap().http.as_ref().unwrap();
        assert_eq!(http.method, "GET");
        assert_eq!(http.expect_status, 200);
    }
}
