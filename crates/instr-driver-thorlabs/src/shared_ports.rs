//! Shared port registry for the Elliptec RS-485 multidrop bus.
//!
//! Several Elliptec devices can share a single serial adapter, each answering
//! to its own bus address. This module keeps one open port per path so the
//! drivers for those devices serialize their traffic on the same mutex.

use instr_core::serial::{open_serial_async, wrap_shared_unbuffered, SharedPortUnbuffered};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Elliptec devices talk at 9600 baud.
const ELLIPTEC_BAUD: u32 = 9600;

static SHARED_PORTS: OnceLock<RwLock<HashMap<String, SharedPortUnbuffered>>> = OnceLock::new();

fn port_registry() -> &'static RwLock<HashMap<String, SharedPortUnbuffered>> {
    SHARED_PORTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get an existing shared port if one is already open for the given path.
pub fn get_existing_port(port_path: &str) -> Option<SharedPortUnbuffered> {
    port_registry().read().get(port_path).cloned()
}

/// Register a newly opened port in the shared registry.
pub fn register_port(port_path: &str, port: SharedPortUnbuffered) {
    port_registry().write().insert(port_path.to_string(), port);
    tracing::info!(port = port_path, "Registered shared Elliptec port");
}

/// Remove a port from the registry, e.g. when it becomes stale.
pub fn remove_port(port_path: &str) -> bool {
    let removed = port_registry().write().remove(port_path).is_some();
    if removed {
        tracing::info!(port = port_path, "Removed stale Elliptec port from registry");
    }
    removed
}

/// Get or create a shared port for the given path.
///
/// If a port is already open for this path, a quick flush verifies it is
/// still alive before reuse; a dead port is reopened and re-registered.
pub async fn get_or_open_port(port_path: &str) -> anyhow::Result<SharedPortUnbuffered> {
    use tokio::io::AsyncWriteExt;

    if let Some(port) = get_existing_port(port_path) {
        let health_check = async {
            let mut guard = port.lock().await;
            guard.flush().await
        };
        match tokio::time::timeout(std::time::Duration::from_millis(100), health_check).await {
            Ok(Ok(())) => {
                tracing::debug!(port = port_path, "Reusing healthy Elliptec shared port");
                return Ok(port);
            }
            Ok(Err(e)) => {
                tracing::warn!(port = port_path, error = %e, "Elliptec port health check failed, reopening");
                remove_port(port_path);
            }
            Err(_) => {
                tracing::warn!(port = port_path, "Elliptec port health check timed out, reopening");
                remove_port(port_path);
            }
        }
    }

    let port = open_serial_async(port_path, ELLIPTEC_BAUD, "Elliptec").await?;
    let shared = wrap_shared_unbuffered(Box::new(port));
    register_port(port_path, shared.clone());
    Ok(shared)
}

/// Close all shared ports. Intended for cleanup and tests.
pub fn close_all_ports() {
    if let Some(registry) = SHARED_PORTS.get() {
        let mut guard = registry.write();
        let count = guard.len();
        guard.clear();
        tracing::info!(count, "Closed all shared Elliptec ports");
    }
}

/// Number of currently open shared ports.
pub fn port_count() -> usize {
    SHARED_PORTS.get().map(|r| r.read().len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_initializes_empty() {
        let _count = port_count();
    }

    #[test]
    fn register_and_remove_round_trip() {
        let (_, device) = tokio::io::duplex(16);
        register_port("duplex-test-port", wrap_shared_unbuffered(Box::new(device)));
        assert!(get_existing_port("duplex-test-port").is_some());
        assert!(remove_port("duplex-test-port"));
        assert!(get_existing_port("duplex-test-port").is_none());
    }
}
