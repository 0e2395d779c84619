//! Clash YAML proxy-config generator (C5).
//!
//! No teacher equivalent exists for this component (the teacher has no
//! Clash export); the document shape follows §4.5 literally and is
//! serialized with `serde_yaml`, the crate `aitechnerd-sshore` (one of
//! the other example repos) uses for its own YAML needs.

use crate::error::{EngineError, Result};
use crate::models::{Host, HostId, Tunnel};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

const URL_TEST_URL: &str = "http://www.gstatic.com/generate_204";
const GROUP_INTERVAL_SECS: u32 = 300;

/// A fixed LAN-direct ruleset, followed at export time by
/// `GEOIP,CN,DIRECT` and `MATCH,Proxy` (§4.5). Not named precisely by the
/// specification beyond "a fixed list". This is the author's choice,
/// the common private-network/loopback set Clash configs ship with.
const LAN_DIRECT_RULES: &[&str] = &[
    "DOMAIN-SUFFIX,local,DIRECT",
    "IP-CIDR,127.0.0.0/8,DIRECT",
    "IP-CIDR,10.0.0.0/8,DIRECT",
    "IP-CIDR,172.16.0.0/12,DIRECT",
    "IP-CIDR,192.168.0.0/16,DIRECT",
    "IP-CIDR,100.64.0.0/10,DIRECT",
    "IP-CIDR,224.0.0.0/4,DIRECT",
    "IP-CIDR6,fe80::/10,DIRECT",
];

#[derive(Debug, Serialize)]
struct ClashConfig {
    port: u16,
    #[serde(rename = "socks-port")]
    socks_port: u16,
    #[serde(rename = "allow-lan")]
    allow_lan: bool,
    mode: String,
    #[serde(rename = "log-level")]
    log_level: String,
    #[serde(rename = "external-ui")]
    external_ui: String,
    #[serde(rename = "external-controller")]
    external_controller: String,
    proxies: Vec<Proxy>,
    #[serde(rename = "proxy-groups")]
    proxy_groups: Vec<ProxyGroup>,
    rules: Vec<String>,
    dns: DnsConfig,
}

#[derive(Debug, Serialize)]
struct Proxy {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    server: String,
    port: u16,
}

#[derive(Debug, Serialize)]
struct ProxyGroup {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    proxies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DnsConfig {
    enable: bool,
    listen: String,
    nameserver: Vec<String>,
    #[serde(rename = "enhanced-mode")]
    enhanced_mode: String,
    #[serde(rename = "fake-ip-range")]
    fake_ip_range: String,
    #[serde(rename = "use-hosts")]
    use_hosts: bool,
    #[serde(rename = "fake-ip-filter")]
    fake_ip_filter: Vec<String>,
}

/// Replace each of space, `_`, `.`, `:`, `/`, `\`, `|`, `*`, `?` with `-`;
/// drop each of `"`, `'`, `<`, `>`; collapse runs of `-`; trim leading and
/// trailing `-`; an empty result becomes `proxy` (§4.5).
pub fn sanitize(name: &str) -> String {
    let mut replaced = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            ' ' | '_' | '.' | ':' | '/' | '\\' | '|' | '*' | '?' => replaced.push('-'),
            '"' | '\'' | '<' | '>' => {}
            other => replaced.push(other),
        }
    }

    let mut collapsed = String::with_capacity(replaced.len());
    let mut prev_dash = false;
    for c in replaced.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }

    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "proxy".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the Clash config for the given active dynamic tunnels, sorted by
/// local port ascending, and emit the header comment + YAML body.
/// `hosts` maps host id to host record, used only for the proxy name.
pub fn export(active_dynamic: &[Tunnel], hosts: &HashMap<HostId, Host>) -> Result<String> {
    if active_dynamic.is_empty() {
        return Err(EngineError::NoActiveSocks5);
    }

    let mut sorted: Vec<&Tunnel> = active_dynamic.iter().collect();
    sorted.sort_by_key(|t| t.local_port);

    let proxies: Vec<Proxy> = sorted
        .iter()
        .map(|t| {
            let host_name = hosts.get(&t.host_id).map(|h| h.name.as_str()).unwrap_or("unknown");
            Proxy {
                name: format!("drilling-{}-{}", sanitize(host_name), t.local_port),
                kind: "socks5".to_string(),
                server: t.local_address.clone(),
                port: t.local_port,
            }
        })
        .collect();

    let proxy_names: Vec<String> = proxies.iter().map(|p| p.name.clone()).collect();

    let auto_group = ProxyGroup {
        name: "Auto".to_string(),
        kind: "url-test".to_string(),
        proxies: proxy_names.clone(),
        url: Some(URL_TEST_URL.to_string()),
        interval: Some(GROUP_INTERVAL_SECS),
    };

    let mut select_members = vec!["Auto".to_string(), "DIRECT".to_string()];
    if proxies.len() >= 2 {
        select_members.push("LoadBalance".to_string());
    }
    select_members.extend(proxy_names.clone());
    let select_group = ProxyGroup {
        name: "Proxy".to_string(),
        kind: "select".to_string(),
        proxies: select_members,
        url: None,
        interval: None,
    };

    let mut proxy_groups = vec![auto_group, select_group];
    if proxies.len() >= 2 {
        proxy_groups.push(ProxyGroup {
            name: "LoadBalance".to_string(),
            kind: "load-balance".to_string(),
            proxies: proxy_names,
            url: Some(URL_TEST_URL.to_string()),
            interval: Some(GROUP_INTERVAL_SECS),
        });
    }

    let mut rules: Vec<String> = LAN_DIRECT_RULES.iter().map(|s| s.to_string()).collect();
    rules.push("GEOIP,CN,DIRECT".to_string());
    rules.push("MATCH,Proxy".to_string());

    let dns = DnsConfig {
        enable: true,
        listen: "0.0.0.0:53".to_string(),
        nameserver: vec!["223.5.5.5".to_string(), "1.1.1.1".to_string()],
        enhanced_mode: "fake-ip".to_string(),
        fake_ip_range: "198.18.0.1/16".to_string(),
        use_hosts: true,
        fake_ip_filter: vec![
            "*.lan".to_string(),
            "localhost.ptlogin2.qq.com".to_string(),
            "dns.msftncsi.com".to_string(),
            "www.msftncsi.com".to_string(),
            "www.msftconnecttest.com".to_string(),
        ],
    };

    let proxy_count = proxies.len();
    let config = ClashConfig {
        port: 7890,
        socks_port: 7891,
        allow_lan: false,
        mode: "rule".to_string(),
        log_level: "info".to_string(),
        external_ui: String::new(),
        external_controller: "127.0.0.1:9090".to_string(),
        proxies,
        proxy_groups,
        rules,
        dns,
    };

    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| EngineError::Validation(format!("failed to serialize clash config: {e}")))?;

    let header = format!(
        "# Generated by ssh-tunnel-manager at {}\n# {} active SOCKS5 proxy(ies)\n# Import this file into a Clash-compatible client.\n",
        Utc::now().to_rfc3339(),
        proxy_count,
    );

    Ok(format!("{header}{yaml}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Host, Tunnel, TunnelStatus};

    /// S4: sanitiser scenarios, literal.
    #[test]
    fn sanitizes_per_scenario_s4() {
        assert_eq!(sanitize("Home  PC_01/dev"), "Home-PC-01-dev");
        assert_eq!(sanitize("***"), "proxy");
        assert_eq!(sanitize("-a--b-"), "a-b");
    }

    /// Invariant 6: sanitiser is idempotent, empties never survive, no
    /// forbidden characters remain.
    #[test]
    fn sanitize_is_idempotent() {
        for input in ["Home  PC_01/dev", "***", "-a--b-", "a\"b'c<d>e", "", "плохо"] {
            let once = sanitize(input);
            let twice = sanitize(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
            assert!(!once.is_empty());
            for forbidden in [' ', '_', '.', ':', '/', '\\', '|', '*', '?', '"', '\'', '<', '>'] {
                assert!(!once.contains(forbidden), "{once:?} still contains {forbidden:?}");
            }
        }
    }

    fn dynamic_tunnel(host_id: i64, port: u16) -> Tunnel {
        let mut t = Tunnel::new_dynamic(host_id, format!("socks-{port}"), port);
        t.status = TunnelStatus::Active;
        t
    }

    /// S7: with one active dynamic tunnel on 127.0.0.1:1080 for host
    /// "home", the proxy entry and select group shape match.
    #[test]
    fn exports_single_dynamic_tunnel() {
        let mut hosts = HashMap::new();
        hosts.insert(1, Host::new("home", "example.com", "alice"));
        let tunnels = vec![dynamic_tunnel(1, 1080)];

        let yaml = export(&tunnels, &hosts).unwrap();
        assert!(yaml.contains("name: drilling-home-1080"));
        assert!(yaml.contains("type: socks5"));
        assert!(yaml.contains("server: 127.0.0.1"));
        assert!(yaml.contains("port: 1080"));

        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let groups = parsed["proxy-groups"].as_sequence().unwrap();
        let proxy_group = groups.iter().find(|g| g["name"] == "Proxy").unwrap();
        let members = proxy_group["proxies"].as_sequence().unwrap();
        assert_eq!(members[0].as_str().unwrap(), "Auto");
        assert_eq!(members[1].as_str().unwrap(), "DIRECT");
    }

    /// S7: exporter gate. Zero active dynamic tunnels is a distinct error.
    #[test]
    fn export_fails_with_no_active_tunnels() {
        let hosts = HashMap::new();
        let err = export(&[], &hosts).unwrap_err();
        assert!(matches!(err, EngineError::NoActiveSocks5));
    }

    /// Invariant 5: deterministic given the same multiset of tunnels
    /// (ignoring the timestamped header line).
    #[test]
    fn export_is_deterministic() {
        let mut hosts = HashMap::new();
        hosts.insert(1, Host::new("home", "example.com", "alice"));
        hosts.insert(2, Host::new("office", "example.org", "bob"));
        let tunnels = vec![dynamic_tunnel(2, 1081), dynamic_tunnel(1, 1080)];

        let first = export(&tunnels, &hosts).unwrap();
        let second = export(&tunnels, &hosts).unwrap();

        let strip_header = |s: &str| s.lines().skip(3).collect::<Vec<_>>().join("\n");
        assert_eq!(strip_header(&first), strip_header(&second));
    }

    #[test]
    fn load_balance_group_appears_with_two_or_more_proxies() {
        let mut hosts = HashMap::new();
        hosts.insert(1, Host::new("home", "example.com", "alice"));
        let tunnels = vec![dynamic_tunnel(1, 1080), dynamic_tunnel(1, 1081)];
        let yaml = export(&tunnels, &hosts).unwrap();
        assert!(yaml.contains("LoadBalance"));
    }
}
