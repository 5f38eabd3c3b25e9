use serde::Serialize;
use std::net::IpAddr;
use sysinfo::Networks;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub port: u16,
    pub addresses: Vec<String>,
    pub connection_urls: Vec<String>,
}

/// Assembles the `/api/server-info` payload: every non-internal IPv4 address
/// of the host plus ready-to-paste connection URLs, localhost first.
pub fn collect(port: u16) -> ServerInfo {
    let networks = Networks::new_with_refreshed_list();
    let mut addresses: Vec<String> = Vec::new();
    for (_, data) in networks.iter() {
        for network in data.ip_networks() {
            let IpAddr::V4(v4) = network.addr else {
                continue;
            };
            if v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() {
                continue;
            }
            addresses.push(v4.to_string());
        }
    }
    addresses.sort();
    addresses.dedup();

    let mut connection_urls = vec![format!("http://localhost:{port}")];
    connection_urls.extend(addresses.iter().map(|address| format!("http://{address}:{port}")));

    ServerInfo {
        port,
        addresses,
        connection_urls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_is_always_first() {
        let info = collect(3000);
        assert_eq!(info.port, 3000);
        assert_eq!(info.connection_urls[0], "http://localhost:3000");
        assert_eq!(info.connection_urls.len(), info.addresses.len() + 1);
        for address in &info.addresses {
            assert!(!address.starts_with("127."));
        }
    }
}
