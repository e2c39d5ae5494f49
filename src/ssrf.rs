// SSRF guard: outbound URL validation against private and reserved networks.
//
// Validation happens at three points in a task's life: when the URL is parsed,
// immediately before each request (DNS may have changed since scheduling), and
// on every redirect hop. The resolved addresses returned here are pinned onto
// the HTTP client so the transport cannot re-resolve to a different host
// (DNS rebinding).

use crate::errors::SsrfError;
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tracing::instrument;

/// Hostnames rejected outright, case-insensitively.
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "metadata.google.internal", "metadata.goog"];

/// A URL that passed validation, with the addresses it resolved to at
/// validation time.
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    pub url: Url,
    pub addrs: Vec<SocketAddr>,
}

pub struct SsrfGuard {
    allow_private: bool,
}

impl Default for SsrfGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SsrfGuard {
    pub fn new() -> Self {
        Self {
            allow_private: false,
        }
    }

    /// Skips the private/reserved address check. For environments that poll
    /// internal services on purpose; the hostname blocklist still applies.
    pub fn allowing_private_targets() -> Self {
        Self {
            allow_private: true,
        }
    }

    /// Parse and validate an outbound URL: scheme, hostname blocklist, and
    /// every address the hostname resolves to right now.
    #[instrument(skip(self))]
    pub async fn validate(&self, raw_url: &str) -> Result<ValidatedTarget, SsrfError> {
        if raw_url.trim().is_empty() {
            return Err(SsrfError::InvalidUrl("empty URL".to_string()));
        }

        let url = Url::parse(raw_url).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SsrfError::DisallowedScheme(other.to_string())),
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(SsrfError::MissingHostname),
        };

        if is_blocked_hostname(&host) {
            return Err(SsrfError::BlockedHostname(host));
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = self.resolve(&host, port).await?;

        Ok(ValidatedTarget { url, addrs })
    }

    /// Resolve a hostname and check every address against the blocklist.
    /// IP-literal hosts skip DNS but not the address check.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, SsrfError> {
        // Url keeps IPv6 literals bracketed.
        let bare = host.trim_start_matches('[').trim_end_matches(']');

        let addrs: Vec<SocketAddr> = if let Ok(ip) = bare.parse::<IpAddr>() {
            vec![SocketAddr::new(ip, port)]
        } else {
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((bare, port))
                .await
                .map_err(|e| SsrfError::DnsResolutionFailed {
                    host: host.to_string(),
                    reason: e.to_string(),
                })?
                .collect();
            if resolved.is_empty() {
                return Err(SsrfError::DnsResolutionFailed {
                    host: host.to_string(),
                    reason: "no addresses returned".to_string(),
                });
            }
            resolved
        };

        if !self.allow_private {
            for addr in &addrs {
                if is_private_ip(addr.ip()) {
                    return Err(SsrfError::PrivateOrReservedAddress {
                        host: host.to_string(),
                        ip: addr.ip(),
                    });
                }
            }
        }

        Ok(addrs)
    }
}

/// True for hostnames on the static blocklist. Trailing root dots are ignored.
pub fn is_blocked_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    BLOCKED_HOSTNAMES
        .iter()
        .any(|blocked| host.eq_ignore_ascii_case(blocked))
}

/// True if the address falls in a loopback, private, link-local, or otherwise
/// reserved range that outbound polling must never reach.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()            // 127.0.0.0/8
        || ip.is_private()      // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()   // 169.254/16, incl. cloud metadata 169.254.169.254
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 192.0.0.0/24 IETF protocol assignments
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24 documentation
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    // An IPv4 address smuggled in as ::ffff:a.b.c.d is judged as IPv4.
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_ipv4(mapped);
    }
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (segments[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_ipv4_ranges() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "192.0.0.10",
            "192.0.2.1",
            "198.18.0.1",
            "0.0.0.0",
            "255.255.255.255",
        ] {
            assert!(is_private_ip(v4(ip)), "{ip} should be private/reserved");
        }
    }

    #[test]
    fn test_public_ipv4_addresses() {
        for ip in ["8.8.8.8", "1.1.1.1", "93.184.216.34", "172.32.0.1", "100.128.0.1"] {
            assert!(!is_private_ip(v4(ip)), "{ip} should be public");
        }
    }

    #[test]
    fn test_private_ipv6_ranges() {
        for ip in ["::1", "::", "fc00::1", "fd12:3456::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private/reserved");
        }
    }

    #[test]
    fn test_public_ipv6_addresses() {
        for ip in ["2001:4860:4860::8888", "2606:4700:4700::1111"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[test]
    fn test_blocked_hostnames_case_insensitive() {
        assert!(is_blocked_hostname("localhost"));
        assert!(is_blocked_hostname("LOCALHOST"));
        assert!(is_blocked_hostname("localhost."));
        assert!(is_blocked_hostname("metadata.google.internal"));
        assert!(is_blocked_hostname("Metadata.Goog"));
        assert!(!is_blocked_hostname("example.com"));
        assert!(!is_blocked_hostname("notlocalhost"));
    }

    #[tokio::test]
    async fn test_validate_rejects_empty_url() {
        let guard = SsrfGuard::new();
        assert!(matches!(
            guard.validate("").await,
            Err(SsrfError::InvalidUrl(_))
        ));
        assert!(matches!(
            guard.validate("   ").await,
            Err(SsrfError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_scheme() {
        let guard = SsrfGuard::new();
        assert!(matches!(
            guard.validate("ftp://example.com").await,
            Err(SsrfError::DisallowedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            guard.validate("file:///etc/passwd").await,
            Err(SsrfError::DisallowedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_blocked_hostnames() {
        let guard = SsrfGuard::new();
        assert!(matches!(
            guard.validate("http://localhost:8080").await,
            Err(SsrfError::BlockedHostname(_))
        ));
        assert!(matches!(
            guard.validate("http://metadata.google.internal/").await,
            Err(SsrfError::BlockedHostname(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_private_ip_literals() {
        let guard = SsrfGuard::new();
        assert!(matches!(
            guard.validate("http://127.0.0.1").await,
            Err(SsrfError::PrivateOrReservedAddress { .. })
        ));
        assert!(matches!(
            guard.validate("http://169.254.169.254/latest/meta-data/").await,
            Err(SsrfError::PrivateOrReservedAddress { .. })
        ));
        assert!(matches!(
            guard.validate("http://[::1]:8080/").await,
            Err(SsrfError::PrivateOrReservedAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_permissive_guard_allows_private_ips_but_not_blocked_hosts() {
        let guard = SsrfGuard::allowing_private_targets();
        let target = guard.validate("http://127.0.0.1:9000/status").await.unwrap();
        assert_eq!(target.addrs.len(), 1);
        assert_eq!(target.addrs[0].port(), 9000);
        assert!(matches!(
            guard.validate("http://localhost:9000/status").await,
            Err(SsrfError::BlockedHostname(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_uses_known_default_ports() {
        let guard = SsrfGuard::allowing_private_targets();
        let target = guard.validate("http://127.0.0.1/").await.unwrap();
        assert_eq!(target.addrs[0].port(), 80);
        let target = guard.validate("https://127.0.0.1/").await.unwrap();
        assert_eq!(target.addrs[0].port(), 443);
    }

    // Requires outbound DNS; skipped in hermetic runs.
    #[tokio::test]
    #[ignore]
    async fn test_validate_allows_public_hostname() {
        let guard = SsrfGuard::new();
        let target = guard.validate("https://example.com/health").await.unwrap();
        assert!(!target.addrs.is_empty());
    }
}
