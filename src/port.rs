//! Transient bind-based port availability checks.
//!
//! Grounded on the teacher's `PortValidator::is_port_available` /
//! `find_available_port_in_range`. The create-time check is advisory
//! only (§4.1): a bind+close here cannot prevent a later race with
//! `start`.

use std::net::TcpListener;

/// Bind and immediately close a TCP listener at `address:port`. Returns
/// true if the bind succeeded.
pub fn is_port_available(address: &str, port: u16) -> bool {
    format!("{address}:{port}")
        .parse()
        .map(|addr| TcpListener::bind(addr).is_ok())
        .unwrap_or(false)
}

/// First port in `[start, end]` on which a transient bind succeeds, or
/// `None` if none are free.
pub fn find_available_port(start: u16, end: u16, address: &str) -> Option<u16> {
    (start..=end).find(|&port| is_port_available(address, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_free_port_in_a_wide_range() {
        let port = find_available_port(20000, 20100, "127.0.0.1");
        assert!(port.is_some());
    }

    #[test]
    fn no_free_port_in_an_occupied_single_port_range() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(find_available_port(port, port, "127.0.0.1"), None);
    }
}
