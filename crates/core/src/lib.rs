pub mod backend;
pub mod capabilities;
pub mod error;
pub mod types;

pub use backend::{CommandOutput, NetworkBackend, ServiceId};
pub use capabilities::BackendCapabilities;
pub use error::{Error, Result};
pub use types::{
    AddressPlan, Attachment, ControllerEndpoint, DefaultRoute, Dpid, ExpectedOutcome, Host,
    HostConfig, HostHandle, HostPlan, InterfaceAddress, InterfaceConfig, Ipv4Cidr, Link, LinkEnd,
    MacAddr, NodeKind, Observation, ProbeKind, ProbeOutcome, ProbeResult, ProbeSpec, ProbeStatus,
    ResolvedPlan, RouterConfig, RouterPlan, ServiceSpec, StaticRoute, Switch, SwitchHandle,
    Topology,
};
