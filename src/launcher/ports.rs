// Port preflight.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

use super::LaunchError;

/// Verifies `port` can be bound on loopback right now by binding and
/// immediately releasing it.
pub fn ensure_free(name: &'static str, port: u16) -> Result<(), LaunchError> {
    match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Err(LaunchError::PortInUse { name, port }),
        Err(e) => Err(LaunchError::BadConfiguration {
            reason: format!("cannot bind {} port {}: {}", name, port, e),
        }),
    }
}
