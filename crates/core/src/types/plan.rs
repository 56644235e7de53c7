//! Address plan: the per-host and per-controller configuration applied on
//! top of a [`Topology`] when it is provisioned.

use crate::error::{Error, Result};
use crate::types::addr::{ControllerEndpoint, Ipv4Cidr, MacAddr};
use crate::types::topology::{Host, Topology};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;

/// Base of Mininet's default address range.
const DEFAULT_IP_BASE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);
const DEFAULT_PREFIX: u8 = 8;

/// Configuration applied to the hosts and switches of a topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressPlan {
    /// Host name → host configuration. Hosts missing here get Mininet's
    /// sequential defaults.
    #[serde(default)]
    pub hosts: BTreeMap<String, HostPlan>,
    /// Controller name → endpoints its switches connect to.
    #[serde(default)]
    pub controllers: BTreeMap<String, Vec<ControllerEndpoint>>,
}

/// Declared configuration for a single host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostPlan {
    /// MAC for the gateway interface.
    pub mac: Option<MacAddr>,
    pub addresses: Vec<InterfaceAddress>,
    /// Next hop for the default route.
    pub default_route: Option<Ipv4Addr>,
    /// Interface carrying the default route; the gateway interface if unset.
    pub route_interface: Option<String>,
    /// Present when this host forwards and NATs between zones.
    pub router: Option<RouterPlan>,
    pub services: Vec<ServiceSpec>,
}

/// An IPv4 assignment on one interface. Without an interface name the
/// host's gateway interface is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AddressRepr")]
pub struct InterfaceAddress {
    pub interface: Option<String>,
    pub cidr: Ipv4Cidr,
}

impl InterfaceAddress {
    pub fn on_gateway(cidr: Ipv4Cidr) -> Self {
        Self {
            interface: None,
            cidr,
        }
    }

    pub fn on(interface: &str, cidr: Ipv4Cidr) -> Self {
        Self {
            interface: Some(interface.to_string()),
            cidr,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Bare(String),
    Full {
        interface: Option<String>,
        cidr: Ipv4Cidr,
    },
}

impl TryFrom<AddressRepr> for InterfaceAddress {
    type Error = Error;

    fn try_from(value: AddressRepr) -> Result<Self> {
        match value {
            AddressRepr::Bare(s) => Ok(InterfaceAddress::on_gateway(s.parse()?)),
            AddressRepr::Full { interface, cidr } => Ok(InterfaceAddress { interface, cidr }),
        }
    }
}

/// Forwarding and NAT for a multi-homed router host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterPlan {
    /// The only source subnet that is masqueraded.
    pub local_subnet: Ipv4Cidr,
    /// Interface facing the "internet" zone.
    pub wan_interface: String,
    #[serde(default)]
    pub routes: Vec<StaticRoute>,
}

/// A static route installed on a router host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticRoute {
    pub destination: Ipv4Cidr,
    pub interface: String,
    #[serde(default)]
    pub via: Option<Ipv4Addr>,
}

/// A background process started on a host for the lifetime of the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    pub name: String,
    pub command: Vec<String>,
}

/// Configuration for one interface after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceConfig {
    pub name: String,
    pub mac: Option<MacAddr>,
    pub addresses: Vec<Ipv4Cidr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefaultRoute {
    pub via: Ipv4Addr,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub local_subnet: Ipv4Cidr,
    pub wan_interface: String,
    pub routes: Vec<StaticRoute>,
}

/// Fully resolved configuration for one host: every interface name exists
/// in the topology and every host has a MAC.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub name: String,
    pub mac: MacAddr,
    pub interfaces: Vec<InterfaceConfig>,
    pub default_route: Option<DefaultRoute>,
    pub router: Option<RouterConfig>,
    pub services: Vec<ServiceSpec>,
}

impl HostConfig {
    /// The first address assigned to any interface.
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.interfaces
            .iter()
            .flat_map(|i| i.addresses.iter())
            .next()
            .map(Ipv4Cidr::addr)
    }
}

/// An [`AddressPlan`] checked against a [`Topology`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlan {
    pub hosts: Vec<HostConfig>,
    /// Switch name → controller endpoints.
    pub switches: BTreeMap<String, Vec<ControllerEndpoint>>,
}

impl ResolvedPlan {
    pub fn host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.name == name)
    }
}

impl AddressPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, name: &str, plan: HostPlan) -> Self {
        self.hosts.insert(name.to_string(), plan);
        self
    }

    pub fn controller(mut self, name: &str, endpoint: ControllerEndpoint) -> Self {
        self.controllers
            .entry(name.to_string())
            .or_default()
            .push(endpoint);
        self
    }

    /// Resolves the plan against a topology, filling in defaults and
    /// checking the topology invariants that depend on addressing.
    pub fn resolve(&self, topology: &Topology) -> Result<ResolvedPlan> {
        topology.validate()?;

        for name in self.hosts.keys() {
            if topology.host(name).is_none() {
                return Err(Error::UnknownEndpoint(name.clone()));
            }
        }

        let default_plan = HostPlan::default();
        let mut seen_macs = HashSet::new();
        let mut hosts = Vec::with_capacity(topology.hosts().len());

        for (index, host) in topology.hosts().iter().enumerate() {
            let plan = self.hosts.get(&host.name).unwrap_or(&default_plan);
            let config = resolve_host(index, host, plan)?;
            if !seen_macs.insert(config.mac) {
                return Err(Error::DuplicateMac(config.mac.to_string()));
            }
            hosts.push(config);
        }

        let mut switches = BTreeMap::new();
        for sw in topology.switches() {
            let mut endpoints = Vec::new();
            for controller in &sw.controllers {
                let declared = self
                    .controllers
                    .get(controller)
                    .filter(|eps| !eps.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidConfig(format!(
                            "controller '{}' bound to switch '{}' has no endpoint",
                            controller, sw.name
                        ))
                    })?;
                endpoints.extend(declared.iter().copied());
            }
            switches.insert(sw.name.clone(), endpoints);
        }

        Ok(ResolvedPlan { hosts, switches })
    }
}

fn resolve_host(index: usize, host: &Host, plan: &HostPlan) -> Result<HostConfig> {
    let gateway = host
        .gateway_interface()
        .ok_or_else(|| Error::InvalidConfig(format!("host '{}' has no interfaces", host.name)))?;
    let mac = plan.mac.unwrap_or_else(|| MacAddr::sequential(index));

    let mut interfaces: Vec<InterfaceConfig> = host
        .interfaces
        .iter()
        .map(|name| InterfaceConfig {
            name: name.clone(),
            mac: (name == gateway).then_some(mac),
            addresses: Vec::new(),
        })
        .collect();

    if plan.addresses.is_empty() {
        interfaces[0].addresses.push(sequential_address(index)?);
    }
    for addr in &plan.addresses {
        let iface = match &addr.interface {
            Some(name) => qualify(&host.name, name),
            None => gateway.to_string(),
        };
        let slot = interfaces
            .iter_mut()
            .find(|i| i.name == iface)
            .ok_or_else(|| unknown_interface(&host.name, &iface))?;
        slot.addresses.push(addr.cidr);
    }

    let default_route = match plan.default_route {
        Some(via) => {
            let interface = match &plan.route_interface {
                Some(name) => qualify(&host.name, name),
                None => gateway.to_string(),
            };
            if !host.interfaces.contains(&interface) {
                return Err(unknown_interface(&host.name, &interface));
            }
            Some(DefaultRoute { via, interface })
        }
        None if plan.router.is_none() => {
            return Err(Error::InvalidConfig(format!(
                "host '{}' needs a default route",
                host.name
            )));
        }
        None => None,
    };

    let router = match &plan.router {
        Some(router) => {
            let wan_interface = qualify(&host.name, &router.wan_interface);
            if !host.interfaces.contains(&wan_interface) {
                return Err(unknown_interface(&host.name, &wan_interface));
            }
            let mut routes = Vec::with_capacity(router.routes.len());
            for route in &router.routes {
                let interface = qualify(&host.name, &route.interface);
                if !host.interfaces.contains(&interface) {
                    return Err(unknown_interface(&host.name, &interface));
                }
                routes.push(StaticRoute {
                    destination: route.destination,
                    interface,
                    via: route.via,
                });
            }
            Some(RouterConfig {
                local_subnet: router.local_subnet.network(),
                wan_interface,
                routes,
            })
        }
        None => None,
    };

    Ok(HostConfig {
        name: host.name.clone(),
        mac,
        interfaces,
        default_route,
        router,
        services: plan.services.clone(),
    })
}

/// Expands a short interface name (`eth1`) to its full form (`h7-eth1`).
fn qualify(host: &str, interface: &str) -> String {
    if interface.contains('-') {
        interface.to_string()
    } else {
        format!("{host}-{interface}")
    }
}

fn unknown_interface(host: &str, interface: &str) -> Error {
    Error::InvalidConfig(format!("host '{host}' has no interface '{interface}'"))
}

fn sequential_address(index: usize) -> Result<Ipv4Cidr> {
    let offset = u32::try_from(index + 1)
        .ok()
        .filter(|n| *n < 1 << 24)
        .ok_or_else(|| Error::InvalidConfig("too many hosts for 10.0.0.0/8".into()))?;
    Ipv4Cidr::new(
        Ipv4Addr::from(u32::from(DEFAULT_IP_BASE) + offset),
        DEFAULT_PREFIX,
    )
}
