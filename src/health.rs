use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Probe strategy bound to a registered IP
#[derive(Debug, Clone)]
pub enum ProbeConfig {
    Tcp {
        address: SocketAddr,
        interval: Duration,
        timeout: Duration,
    },
    Http {
        method: String,
        url: String,
        expect_status: u16,
        interval: Duration,
        timeout: Duration,
    },
}

impl ProbeConfig {
    fn interval(&self) -> Duration {
        match self {
            ProbeConfig::Tcp { interval, .. } => *interval,
            ProbeConfig::Http { interval, .. } => *interval,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            ProbeConfig::Tcp { timeout, .. } => *timeout,
            ProbeConfig::Http { timeout, .. } => *timeout,
        }
    }
}

struct HealthEntry {
    healthy: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Registry of health-checked IPs. Each registered address runs its own
/// background probe loop; the healthy flag is written only by that loop
/// and read lock-free by anyone.
pub struct HealthRegistry {
    entries: DashMap<String, HealthEntry>,
    http: reqwest::Client,
}

impl HealthRegistry {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            entries: DashMap::new(),
            http: reqwest::Client::builder().build()?,
        })
    }

    /// Register an address with a probe. Returns false if the address is
    /// already registered; the existing entry is left untouched.
    pub fn register(&self, address: IpAddr, probe: ProbeConfig) -> bool {
        match self.entries.entry(address.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let healthy = Arc::new(AtomicBool::new(false));
                let task = tokio::spawn(probe_loop(
                    address,
                    probe,
                    healthy.clone(),
                    self.http.clone(),
                ));
                slot.insert(HealthEntry { healthy, task });
                true
            }
        }
    }

    /// Remove an address and cancel its probe task. The cancellation is
    /// fire-and-forget; the task may still be winding down on return.
    pub fn unregister(&self, address: &IpAddr) -> bool {
        match self.entries.remove(&address.to_string()) {
            Some((_, entry)) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    /// Lock-free health read. None means the address is not registered;
    /// callers treat that as healthy (fail-open).
    pub fn status(&self, address: &IpAddr) -> Option<bool> {
        self.entries
            .get(&address.to_string())
            .map(|entry| entry.healthy.load(Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel every probe task. Used at process shutdown.
    pub fn shutdown(&self) {
        for entry in self.entries.iter() {
            entry.task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_status_for_test(&self, address: &IpAddr, healthy: bool) {
        if let Some(entry) = self.entries.get(&address.to_string()) {
            entry.healthy.store(healthy, Ordering::Relaxed);
        }
    }
}

async fn probe_loop(
    address: IpAddr,
    probe: ProbeConfig,
    healthy: Arc<AtomicBool>,
    http: reqwest::Client,
) {
    let interval = probe.interval();
    let timeout = probe.timeout();

    loop {
        let ok = match tokio::time::timeout(timeout, run_probe(&probe, &http)).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                debug!("Probe error for {}: {}", address, e);
                false
            }
            Err(_) => {
                debug!("Probe timeout for {} after {:?}", address, timeout);
                false
            }
        };

        let was = healthy.swap(ok, Ordering::Relaxed);
        if was != ok {
            if ok {
                debug!("{} is healthy", address);
            } else {
                warn!("{} is unhealthy", address);
            }
        }

        tokio::time::sleep(interval).await;
    }
}

async fn run_probe(probe: &ProbeConfig, http: &reqwest::Client) -> anyhow::Result<bool> {
    match probe {
        ProbeConfig::Tcp { address, .. } => {
            // Success is simply being able to open the connection
            let stream = TcpStream::connect(address).await?;
            drop(stream);
            Ok(true)
        }
        ProbeConfig::Http {
            method,
            url,
            expect_status,
            timeout,
            ..
        } => {
            let method = reqwest::Method::from_bytes(method.as_bytes())?;
            let response = http
                .request(method, url.as_str())
                .timeout(*timeout)
                .send()
                .await?;
            Ok(response.status().as_u16() == *expect_status)
        }
    }
}
