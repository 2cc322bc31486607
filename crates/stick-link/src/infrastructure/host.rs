//! Native answers to the capability detector's host queries.

use tracing::debug;

use crate::application::capabilities::HostEnvironment;

/// Probes the machine the binary runs on.
///
/// Both checks are read-only: port enumeration opens no device and the socket
/// check asks only whether the API exists, not whether a network is up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHost;

impl HostEnvironment for NativeHost {
    fn serial_available(&self) -> bool {
        match serialport::available_ports() {
            Ok(_) => true,
            Err(e) => {
                debug!("serial enumeration unavailable: {e}");
                false
            }
        }
    }

    /// Native builds always link a socket API; reachability is decided by
    /// the socket transport's own connect timeout.
    fn network_available(&self) -> bool {
        true
    }
}
