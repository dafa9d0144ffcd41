//! SSRF defenses for outbound fetches.
//!
//! `is_private_ip` classifies addresses conservatively (unparsable input
//! counts as private). `FetchGuard::safe_fetch` validates every hop of a
//! redirect chain against DNS before any request is sent, detects loops,
//! and strips credential headers when a redirect crosses origins.

use krill::{Error, ErrorKind, Result};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Url;

fn is_private_ipv4(v4: Ipv4Addr) -> bool {
    let [a, b, c, _d] = v4.octets();
    // 10.0.0.0/8
    if a == 10 {
        return true;
    }
    // 172.16.0.0/12
    if a == 172 && (16..=31).contains(&b) {
        return true;
    }
    // 192.168.0.0/16
    if a == 192 && b == 168 {
        return true;
    }
    // 127.0.0.0/8 (loopback)
    if a == 127 {
        return true;
    }
    // 169.254.0.0/16 (link-local)
    if a == 169 && b == 254 {
        return true;
    }
    // 100.64.0.0/10 (CGNAT)
    if a == 100 && (64..=127).contains(&b) {
        return true;
    }
    // 0.0.0.0
    if a == 0 && b == 0 && c == 0 {
        return true;
    }
    false
}

fn is_private_ipv6(v6: Ipv6Addr) -> bool {
    if v6.is_loopback() || v6.is_unspecified() {
        return true;
    }
    let octets = v6.octets();
    // fc00::/7 (unique local)
    if octets[0] & 0xFE == 0xFC {
        return true;
    }
    // fe80::/10 (link-local)
    if octets[0] == 0xFE && octets[1] & 0xC0 == 0x80 {
        return true;
    }
    // IPv4-mapped ::ffff:x.x.x.x
    if let Some(v4) = v6.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    false
}

/// Whether `ip` is private, loopback, link-local, CGNAT, or otherwise
/// unroutable. Unparsable input is treated as private.
pub fn is_private_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_ipv4(v4),
        Ok(IpAddr::V6(v6)) => is_private_ipv6(v6),
        Err(_) => {
            log::warn!("FetchGuard: cannot parse IP '{ip}', treating as private");
            true
        }
    }
}

/// A fetched HTTP response, headers lowercased.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Request headers that must not survive a cross-origin redirect.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Whether two URLs share scheme, host, and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Drop credential headers from `headers` when crossing origins.
pub fn sanitize_redirect_headers(
    headers: &mut HashMap<String, String>,
    from: &Url,
    to: &Url,
) {
    if !same_origin(from, to) {
        for name in CREDENTIAL_HEADERS {
            if headers.remove(*name).is_some() {
                log::debug!("FetchGuard: dropped {name} header on cross-origin redirect");
            }
        }
    }
}

/// SSRF-guarded HTTP fetcher.
pub struct FetchGuard {
    client: reqwest::Client,
}

impl Default for FetchGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchGuard {
    pub fn new() -> Self {
        // Redirects are followed manually so every hop gets validated.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        FetchGuard { client }
    }

    /// Extract the hostname from a URL, tolerating bare host[:port] input.
    pub fn extract_hostname(url: &str) -> String {
        let rest = match url.find("://") {
            Some(pos) => &url[pos + 3..],
            None => url,
        };
        let rest = rest.split('/').next().unwrap_or("");
        let rest = match rest.rfind('@') {
            Some(pos) => &rest[pos + 1..],
            None => rest,
        };
        rest.split(':').next().unwrap_or("").to_string()
    }

    /// Resolve the URL's hostname and reject it if any address is private.
    /// No request is sent by this check.
    pub async fn validate_url(&self, url: &str) -> Result<()> {
        let hostname = Self::extract_hostname(url);
        if hostname.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "Empty hostname in URL"));
        }

        // IP literals skip DNS.
        if let Ok(addr) = hostname.trim_matches(['[', ']']).parse::<IpAddr>() {
            if is_private_ip(&addr.to_string()) {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "SSRF blocked: URL resolves to private IP",
                    format!("{hostname} -> {addr}"),
                ));
            }
            return Ok(());
        }

        let addrs = tokio::net::lookup_host((hostname.as_str(), 443))
            .await
            .map_err(|e| {
                Error::with_detail(
                    ErrorKind::ConnectionFailed,
                    "DNS resolution failed for SSRF check",
                    format!("{hostname}: {e}"),
                )
            })?;

        for addr in addrs {
            let ip = addr.ip().to_string();
            if is_private_ip(&ip) {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "SSRF blocked: URL resolves to private IP",
                    format!("{hostname} -> {ip}"),
                ));
            }
        }
        Ok(())
    }

    /// Fetch `url`, following up to `max_redirects` redirects. Each hop is
    /// re-validated against the SSRF rules; visiting the same URL twice is
    /// a redirect loop; credential headers are stripped on cross-origin
    /// hops.
    pub async fn safe_fetch(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        max_redirects: usize,
    ) -> Result<FetchResponse> {
        let mut current_url = url.to_string();
        let mut headers = headers;
        let mut visited: HashSet<String> = HashSet::new();

        for _ in 0..=max_redirects {
            self.validate_url(&current_url).await?;

            if !visited.insert(current_url.clone()) {
                return Err(Error::with_detail(
                    ErrorKind::InvalidArgument,
                    "Redirect loop detected",
                    current_url,
                ));
            }

            let mut req = self.client.get(&current_url);
            for (name, value) in &headers {
                req = req.header(name, value);
            }
            let resp = req.send().await.map_err(|e| {
                Error::with_detail(
                    ErrorKind::ConnectionFailed,
                    "Fetch failed",
                    format!("{current_url}: {e}"),
                )
            })?;

            let status = resp.status().as_u16();
            if (300..400).contains(&status) {
                if let Some(location) = resp
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                {
                    let from = Url::parse(&current_url).map_err(|e| {
                        Error::with_detail(
                            ErrorKind::InvalidArgument,
                            "Invalid URL",
                            format!("{current_url}: {e}"),
                        )
                    })?;
                    let to = from.join(location).map_err(|e| {
                        Error::with_detail(
                            ErrorKind::InvalidArgument,
                            "Invalid redirect location",
                            format!("{location}: {e}"),
                        )
                    })?;
                    sanitize_redirect_headers(&mut headers, &from, &to);
                    log::debug!("FetchGuard: following redirect to {to}");
                    current_url = to.to_string();
                    continue;
                }
            }

            let mut out_headers = HashMap::new();
            for (name, value) in resp.headers() {
                if let Ok(v) = value.to_str() {
                    out_headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
                }
            }
            let body = resp.bytes().await.map_err(|e| {
                Error::with_detail(ErrorKind::ConnectionFailed, "Failed to read body", e.to_string())
            })?;

            return Ok(FetchResponse {
                status,
                headers: out_headers,
                body: body.to_vec(),
            });
        }

        Err(Error::with_detail(
            ErrorKind::InvalidArgument,
            "Too many redirects",
            format!("max={max_redirects}"),
        ))
    }
}
