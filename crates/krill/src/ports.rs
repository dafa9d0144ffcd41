//! TCP port probing for the gateway listener's auto-search.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Whether `port` can currently be bound on loopback.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Scan `[start_port, start_port + max_attempts)` for a bindable port.
pub fn find_free_port(start_port: u16, max_attempts: u16) -> Option<u16> {
    for i in 0..max_attempts {
        let Some(candidate) = start_port.checked_add(i) else {
            break;
        };
        if is_port_available(candidate) {
            log::debug!("Found free port: {candidate}");
            return Some(candidate);
        }
    }
    log::warn!(
        "No free port found in range [{}, {})",
        start_port,
        start_port as u32 + max_attempts as u32
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_free_port() {
        let port = find_free_port(49500, 100).expect("some port in range should be free");
        assert!(port >= 49500);
    }

    #[test]
    fn occupied_port_is_skipped() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let held = listener.local_addr().unwrap().port();
        assert!(!is_port_available(held));
        let found = find_free_port(held, 10).unwrap();
        assert_ne!(found, held);
    }
}
