//! IP blacklist consulted when connections arrive
//!
//! Rules are single addresses or CIDR networks. The set can be refreshed
//! from the GitHub meta document, which lists the networks GitHub Actions
//! runners connect from.

use async_trait::async_trait;
use log::{debug, error, info};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, RustyRelayError};

/// Blacklist service interface
#[async_trait]
pub trait Blacklist: Send + Sync {
    async fn contains(&self, ip: IpAddr) -> bool;

    /// Add an address or network, e.g. `1.2.3.4` or `1.2.3.0/24`
    async fn add(&self, entry: &str) -> Result<()>;

    async fn remove(&self, entry: &str) -> bool;

    async fn clear(&self);

    /// Populate the set from the external feed; returns how many rules were added
    async fn refresh(&self) -> Result<usize>;

    async fn len(&self) -> usize;
}

/// One blacklist rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRule {
    Addr(IpAddr),
    Network { base: IpAddr, prefix: u8 },
}

impl BlockRule {
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let invalid = || RustyRelayError::BlacklistError(format!("invalid entry: {}", entry));

        match entry.split_once('/') {
            None => entry.parse().map(BlockRule::Addr).map_err(|_| invalid()),
            Some((base, prefix)) => {
                let base: IpAddr = base.parse().map_err(|_| invalid())?;
                let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
                let max = if base.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(invalid());
                }
                Ok(BlockRule::Network { base, prefix })
            }
        }
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        match *self {
            BlockRule::Addr(addr) => addr == ip,
            BlockRule::Network { base, prefix } => match (base, ip) {
                (IpAddr::V4(base), IpAddr::V4(ip)) => {
                    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
                    u32::from(base) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(base), IpAddr::V6(ip)) => {
                    let mask = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
                    u128::from(base) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubMeta {
    #[serde(default)]
    actions: Vec<String>,
}

/// In-memory blacklist with an optional HTTP feed
pub struct IpBlacklist {
    rules: RwLock<HashSet<BlockRule>>,
    feed_url: Option<String>,
    client: reqwest::Client,
}

impl IpBlacklist {
    pub fn new(feed_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build blacklist HTTP client, using defaults: {}", e);
                reqwest::Client::new()
            });

        Self {
            rules: RwLock::new(HashSet::new()),
            feed_url,
            client,
        }
    }
}

#[async_trait]
impl Blacklist for IpBlacklist {
    async fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.rules.read().await.iter().any(|rule| rule.matches(ip))
    }

    async fn add(&self, entry: &str) -> Result<()> {
        let rule = BlockRule::parse(entry)?;
        self.rules.write().await.insert(rule);
        Ok(())
    }

    async fn remove(&self, entry: &str) -> bool {
        match BlockRule::parse(entry) {
            Ok(rule) => self.rules.write().await.remove(&rule),
            Err(_) => false,
        }
    }

    async fn clear(&self) {
        self.rules.write().await.clear();
    }

    async fn refresh(&self) -> Result<usize> {
        let Some(url) = &self.feed_url else {
            return Ok(0);
        };

        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let feed = parse_feed(&body)?;

        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.extend(feed);
        Ok(rules.len() - before)
    }

    async fn len(&self) -> usize {
        self.rules.read().await.len()
    }
}

/// Rules listed in the `actions` section of a GitHub meta document.
///
/// IPv6 networks are skipped, as are entries that fail to parse.
pub fn parse_feed(body: &str) -> Result<Vec<BlockRule>> {
    let meta: GithubMeta = serde_json::from_str(body)?;

    Ok(meta
        .actions
        .iter()
        .filter(|entry| !entry.contains(':'))
        .filter_map(|entry| match BlockRule::parse(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                debug!("Skipping feed entry: {}", e);
                None
            }
        })
        .collect())
}

/// Refresh the blacklist in the background; failures are only logged
pub fn spawn_refresh(blacklist: Arc<dyn Blacklist>) {
    tokio::spawn(async move {
        match blacklist.refresh().await {
            Ok(added) => info!("Added {} GitHub Actions IPs to blacklist.", added),
            Err(e) => error!("Failed to fetch GitHub Actions IPs: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_rules() {
        assert_eq!(
            BlockRule::parse("1.2.3.4").unwrap(),
            BlockRule::Addr(ip("1.2.3.4"))
        );
        assert_eq!(
            BlockRule::parse("4.148.0.0/16").unwrap(),
            BlockRule::Network {
                base: ip("4.148.0.0"),
                prefix: 16
            }
        );
        assert!(BlockRule::parse("4.148.0.0/33").is_err());
        assert!(BlockRule::parse("not-an-ip").is_err());
    }

    #[test]
    fn test_network_matching() {
        let rule = BlockRule::parse("4.148.0.0/16").unwrap();
        assert!(rule.matches(ip("4.148.200.1")));
        assert!(!rule.matches(ip("4.149.0.1")));
        assert!(!rule.matches(ip("::1")));

        let any = BlockRule::parse("0.0.0.0/0").unwrap();
        assert!(any.matches(ip("203.0.113.9")));

        let v6 = BlockRule::parse("2001:db8::/32").unwrap();
        assert!(v6.matches(ip("2001:db8:1::5")));
        assert!(!v6.matches(ip("2001:db9::5")));
    }

    #[tokio::test]
    async fn test_add_remove_clear() {
        let blacklist = IpBlacklist::new(None);
        blacklist.add("10.0.0.1").await.unwrap();
        blacklist.add("192.168.0.0/24").await.unwrap();

        assert!(blacklist.contains(ip("10.0.0.1")).await);
        assert!(blacklist.contains(ip("192.168.0.77")).await);
        assert!(blacklist.contains(ip("::ffff:10.0.0.1")).await);
        assert!(!blacklist.contains(ip("10.0.0.2")).await);

        assert!(blacklist.remove("10.0.0.1").await);
        assert!(!blacklist.contains(ip("10.0.0.1")).await);

        blacklist.clear().await;
        assert_eq!(blacklist.len().await, 0);
    }

    #[test]
    fn test_parse_feed() {
        let body = r#"{
            "verifiable_password_authentication": false,
            "actions": ["4.148.0.0/16", "2a01:111:f403::/48", "13.64.0.0/bad", "52.160.0.1"],
            "web": ["140.82.112.0/20"]
        }"#;

        let rules = parse_feed(body).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].matches(ip("4.148.200.1")));
        assert_eq!(rules[1], BlockRule::Addr(ip("52.160.0.1")));

        assert!(parse_feed("{}").unwrap().is_empty());
        assert!(parse_feed("<html>rate limited</html>").is_err());
    }

    #[tokio::test]
    async fn test_refresh_without_feed_is_noop() {
        let blacklist = IpBlacklist::new(None);
        assert_eq!(blacklist.refresh().await.unwrap(), 0);
    }
}
