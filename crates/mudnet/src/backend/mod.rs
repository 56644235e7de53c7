mod netns;

pub use netns::NetnsBackend;

use mudnet_core::{NetworkBackend, Result};

use std::sync::Arc;

/// All backends compiled into this build, available or not.
pub fn available_backends() -> Vec<Box<dyn NetworkBackend>> {
    vec![Box::new(NetnsBackend::new())]
}

/// Picks the first backend that can run on this host.
pub fn select_backend() -> Result<Arc<dyn NetworkBackend>> {
    let netns = NetnsBackend::new();
    if netns.is_available() {
        return Ok(Arc::new(netns));
    }

    Err(mudnet_core::Error::Backend(
        "no network backend available (need `ip` and `ovs-vsctl` in PATH)".to_string(),
    ))
}
