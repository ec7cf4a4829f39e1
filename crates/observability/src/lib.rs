//! Process-wide tracing setup shared by the gateway and worker binaries.

/// Initialize tracing/logging for a service.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(service_name: &str) {
    tracing::init(service_name);
}

/// Tracing configuration (filters, output format).
pub mod tracing;
