use serde::Serialize;

/// Features advertised by a network backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendCapabilities {
    /// Switches speak OpenFlow to an external controller.
    pub openflow: bool,
    /// Hosts can run long-lived background processes.
    pub background_services: bool,
    /// Commands touch real kernel state and need root privileges.
    pub requires_root: bool,
    /// Maximum number of hosts. None means no known limit.
    pub max_hosts: Option<usize>,
}
