//! Connectivity diagnostics (§4.7): run when a connection suspects it can't
//! reach the server, rate-limited and capped to a fixed number of saved
//! reports.
//!
//! Grounded in `shared/debug/connectivity.py`'s `ConnectivityReport`. DNS and
//! local-address probing use `tokio`/`std::net` directly; the HTTPS probe
//! uses `reqwest`, matching how other printer/network-facing Rust clients
//! reach for it for their own HTTP calls. Full NIC enumeration
//! (`netifaces`/`psutil` in the original) has no convenient Rust equivalent,
//! so this only reports the host's outbound-routing address and hostname.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::util::slugify;

const MAX_STORED_REPORTS: usize = 5;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsResult {
    pub host: String,
    pub resolved_ips: Vec<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketProbeResult {
    pub url: String,
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProbeResult {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalNetworkInfo {
    pub hostname: String,
    /// The local address the OS would route outbound traffic through;
    /// `None` if no route could be determined (e.g. fully offline).
    pub outbound_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub timestamp_unix_ms: i64,
    pub dns_results: Vec<DnsResult>,
    pub websocket_results: Vec<WebSocketProbeResult>,
    pub http_results: Vec<HttpProbeResult>,
    pub local_network_info: LocalNetworkInfo,
}

impl ConnectivityReport {
    fn local_network_info() -> LocalNetworkInfo {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let outbound_address = outbound_address().ok().map(|addr| addr.ip().to_string());

        LocalNetworkInfo { hostname, outbound_address }
    }

    async fn resolve_dns(host: &str) -> DnsResult {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => {
                let resolved_ips: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
                DnsResult {
                    host: host.to_string(),
                    resolved_ips,
                    success: true,
                    error_message: None,
                }
            }
            Err(e) => DnsResult {
                host: host.to_string(),
                resolved_ips: Vec::new(),
                success: false,
                error_message: Some(e.to_string()),
            },
        }
    }

    async fn websocket_probe(url: &str) -> WebSocketProbeResult {
        let start = Instant::now();
        let attempt = tokio::time::timeout(PROBE_TIMEOUT, tokio_tungstenite::connect_async(url)).await;
        match attempt {
            Ok(Ok((mut stream, _response))) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let _ = futures::SinkExt::close(&mut stream).await;
                WebSocketProbeResult {
                    url: url.to_string(),
                    success: true,
                    latency_ms: Some(latency_ms),
                    error_message: None,
                }
            }
            Ok(Err(e)) => WebSocketProbeResult {
                url: url.to_string(),
                success: false,
                latency_ms: None,
                error_message: Some(e.to_string()),
            },
            Err(_) => WebSocketProbeResult {
                url: url.to_string(),
                success: false,
                latency_ms: None,
                error_message: Some("timed out".to_string()),
            },
        }
    }

    async fn http_probe(url: &str) -> HttpProbeResult {
        let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                return HttpProbeResult {
                    url: url.to_string(),
                    success: false,
                    status_code: None,
                    error_message: Some(e.to_string()),
                }
            }
        };

        match client.get(url).send().await {
            Ok(response) => HttpProbeResult {
                url: url.to_string(),
                success: response.status().is_success(),
                status_code: Some(response.status().as_u16()),
                error_message: None,
            },
            Err(e) => HttpProbeResult {
                url: url.to_string(),
                success: false,
                status_code: None,
                error_message: Some(e.to_string()),
            },
        }
    }

    /// Runs the full probe suite against the given candidate URLs (§4.7).
    #[instrument(skip_all)]
    pub async fn generate(ws_urls: &[String], http_urls: &[String], extra_dns_hosts: &[String]) -> Self {
        info!("beginning connectivity test suite");

        let mut dns_hosts: Vec<String> = ws_urls
            .iter()
            .chain(http_urls.iter())
            .filter_map(|u| host_of(u))
            .collect();
        dns_hosts.extend(extra_dns_hosts.iter().cloned());
        dns_hosts.sort();
        dns_hosts.dedup();

        let mut dns_results = Vec::new();
        for host in &dns_hosts {
            dns_results.push(Self::resolve_dns(host).await);
        }

        let mut websocket_results = Vec::new();
        for url in ws_urls {
            websocket_results.push(Self::websocket_probe(url).await);
        }

        let mut http_results = Vec::new();
        for url in http_urls {
            http_results.push(Self::http_probe(url).await);
        }

        ConnectivityReport {
            timestamp_unix_ms: now_unix_ms(),
            dns_results,
            websocket_results,
            http_results,
            local_network_info: Self::local_network_info(),
        }
    }

    /// Probes the SimplyPrint production/staging/test backends plus a couple
    /// of well-known public hosts, mirroring `generate_default` (§4.7).
    pub async fn generate_default() -> Self {
        Self::generate(
            &[
                "wss://ws.simplyprint.io".to_string(),
                "wss://wsstaging.simplyprint.io".to_string(),
                "wss://testws3.simplyprint.io".to_string(),
            ],
            &[
                "https://api.simplyprint.io".to_string(),
                "https://apistaging.simplyprint.io".to_string(),
                "https://testapi.simplyprint.io".to_string(),
            ],
            &["1.1.1.1".to_string(), "google.com".to_string()],
        )
        .await
    }

    /// Writes the report as `connectivity_report_<unix_ms>_<host>.json` under
    /// `dir`, deleting the oldest if more than [`MAX_STORED_REPORTS`] remain
    /// (§4.7 "capped at a fixed number of past reports").
    pub fn store_in(&self, dir: &Path) -> io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let mut existing = list_reports(dir)?;
        existing.sort();
        while existing.len() >= MAX_STORED_REPORTS {
            if let Some(oldest) = existing.first() {
                let _ = std::fs::remove_file(dir.join(oldest));
                existing.remove(0);
            } else {
                break;
            }
        }

        // Hostname component comes after the timestamp so lexical sort
        // (used by `list_reports`/`read_previous_reports`) still orders by
        // age first.
        let filename = format!(
            "connectivity_report_{}_{}.json",
            self.timestamp_unix_ms,
            slugify(&self.local_network_info.hostname)
        );
        let full_path = dir.join(filename);
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(&full_path, json)?;
        Ok(full_path)
    }

    pub fn read_previous_reports(dir: &Path) -> io::Result<Vec<ConnectivityReport>> {
        let mut names = list_reports(dir)?;
        names.sort();
        names.reverse();

        let mut reports = Vec::new();
        for name in names {
            let text = std::fs::read_to_string(dir.join(&name))?;
            match serde_json::from_str(&text) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(file = %name, error = %e, "failed to parse stored connectivity report"),
            }
        }
        Ok(reports)
    }

    /// Whether enough time has passed since the most recent stored report to
    /// justify running another probe (§4.7 rate limit).
    pub fn should_skip(dir: &Path, min_interval: Duration) -> bool {
        let Ok(reports) = Self::read_previous_reports(dir) else {
            return false;
        };
        let Some(latest) = reports.first() else {
            return false;
        };
        let age_ms = now_unix_ms().saturating_sub(latest.timestamp_unix_ms);
        (age_ms as u128) < min_interval.as_millis()
    }
}

fn list_reports(dir: &Path) -> io::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with("connectivity_report_") && name.ends_with(".json") {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn host_of(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme.split('/').next()?;
    Some(host.split(':').next()?.to_string())
}

fn outbound_address() -> io::Result<SocketAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("1.1.1.1:80")?;
    socket.local_addr()
}

/// `Date.now()`-equivalent timestamp source, kept in one place so it stays
/// out of the probe functions themselves.
fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_scheme_and_path() {
        assert_eq!(host_of("wss://ws.simplyprint.io/0.2/p/1/tok").as_deref(), Some("ws.simplyprint.io"));
        assert_eq!(host_of("https://api.simplyprint.io").as_deref(), Some("api.simplyprint.io"));
    }

    #[test]
    fn store_and_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("sp-connectivity-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let report = ConnectivityReport {
            timestamp_unix_ms: 1,
            dns_results: Vec::new(),
            websocket_results: Vec::new(),
            http_results: Vec::new(),
            local_network_info: LocalNetworkInfo { hostname: "h".into(), outbound_address: None },
        };
        report.store_in(&dir).unwrap();

        let reports = ConnectivityReport::read_previous_reports(&dir).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].timestamp_unix_ms, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn store_in_caps_to_max_reports() {
        let dir = std::env::temp_dir().join(format!("sp-connectivity-cap-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        for i in 0..(MAX_STORED_REPORTS as i64 + 3) {
            let report = ConnectivityReport {
                timestamp_unix_ms: i,
                dns_results: Vec::new(),
                websocket_results: Vec::new(),
                http_results: Vec::new(),
                local_network_info: LocalNetworkInfo { hostname: "h".into(), outbound_address: None },
            };
            report.store_in(&dir).unwrap();
        }

        let names = list_reports(&dir).unwrap();
        assert!(names.len() <= MAX_STORED_REPORTS);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
