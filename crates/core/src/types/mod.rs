mod addr;
mod plan;
mod probe;
mod topology;

pub use addr::{ControllerEndpoint, Dpid, Ipv4Cidr, MacAddr};
pub use plan::{
    AddressPlan, DefaultRoute, HostConfig, HostPlan, InterfaceAddress, InterfaceConfig,
    ResolvedPlan, RouterConfig, RouterPlan, ServiceSpec, StaticRoute,
};
pub use probe::{
    ExpectedOutcome, Observation, ProbeKind, ProbeOutcome, ProbeResult, ProbeSpec, ProbeStatus,
};
pub use topology::{
    Attachment, Host, HostHandle, Link, LinkEnd, NodeKind, Switch, SwitchHandle, Topology,
};
