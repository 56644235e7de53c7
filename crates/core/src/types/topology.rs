//! In-memory topology graph: hosts, switches, links and controller bindings.
//!
//! Building a [`Topology`] never touches a network backend. Interface names
//! are assigned when links are created, using Mininet's convention:
//!
//! - host interfaces are `<host>-eth<N>` numbered from 0,
//! - switch ports are `<switch>-eth<N>` numbered from 1,
//!
//! in link-creation order. A host's first interface (`eth0`) is its gateway
//! interface: the provisioner installs the default route on it unless the
//! address plan names another one.

use crate::error::{Error, Result};
use crate::types::addr::Dpid;
use serde::{Deserialize, Serialize};

/// Whether a node is a host or a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Host,
    Switch,
}

/// Handle returned by [`Topology::add_host`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostHandle(String);

impl HostHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for HostHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Handle returned by [`Topology::add_switch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwitchHandle(String);

impl SwitchHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SwitchHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    /// Interface names in link-creation order.
    pub interfaces: Vec<String>,
}

impl Host {
    /// The interface that carries the default route.
    pub fn gateway_interface(&self) -> Option<&str> {
        self.interfaces.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub name: String,
    pub dpid: Option<Dpid>,
    /// Names of the controllers governing this switch.
    pub controllers: Vec<String>,
    /// Port names in link-creation order.
    pub ports: Vec<String>,
}

/// One side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnd {
    pub node: String,
    pub kind: NodeKind,
    pub interface: String,
}

/// An unordered pair of endpoints, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub a: LinkEnd,
    pub b: LinkEnd,
}

impl Link {
    fn joins(&self, x: &str, y: &str) -> bool {
        (self.a.node == x && self.b.node == y) || (self.a.node == y && self.b.node == x)
    }

    /// The end of this link attached to `node`, if any.
    pub fn end_for(&self, node: &str) -> Option<&LinkEnd> {
        if self.a.node == node {
            Some(&self.a)
        } else if self.b.node == node {
            Some(&self.b)
        } else {
            None
        }
    }

    /// The end of this link opposite to `node`.
    pub fn peer_of(&self, node: &str) -> Option<&LinkEnd> {
        if self.a.node == node {
            Some(&self.b)
        } else if self.b.node == node {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// A switch directly attached to a host, with the interfaces on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment<'a> {
    pub link: &'a Link,
    pub switch: &'a str,
    pub host_interface: &'a str,
    pub switch_port: &'a str,
}

/// The topology graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    hosts: Vec<Host>,
    switches: Vec<Switch>,
    links: Vec<Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host. Names are shared between hosts and switches.
    pub fn add_host(&mut self, name: &str) -> Result<HostHandle> {
        self.check_new_name(name)?;
        self.hosts.push(Host {
            name: name.to_string(),
            interfaces: Vec::new(),
        });
        Ok(HostHandle(name.to_string()))
    }

    /// Adds a switch, optionally pinning its datapath id.
    pub fn add_switch(&mut self, name: &str, dpid: Option<Dpid>) -> Result<SwitchHandle> {
        self.check_new_name(name)?;
        if let Some(dpid) = dpid
            && self.switches.iter().any(|s| s.dpid == Some(dpid))
        {
            return Err(Error::DuplicateDatapathId(dpid.to_string()));
        }
        self.switches.push(Switch {
            name: name.to_string(),
            dpid,
            controllers: Vec::new(),
            ports: Vec::new(),
        });
        Ok(SwitchHandle(name.to_string()))
    }

    /// Binds a switch to a named controller. A switch may be bound to
    /// several controllers; binding the same one twice is a no-op.
    pub fn bind_controller(&mut self, switch: impl AsRef<str>, controller: &str) -> Result<()> {
        let switch = switch.as_ref();
        let sw = self
            .switches
            .iter_mut()
            .find(|s| s.name == switch)
            .ok_or_else(|| Error::UnknownEndpoint(switch.to_string()))?;
        if !sw.controllers.iter().any(|c| c == controller) {
            sw.controllers.push(controller.to_string());
        }
        Ok(())
    }

    /// Links two previously added nodes.
    ///
    /// Host-to-switch and switch-to-switch links are allowed; host-to-host
    /// links and self-links are rejected.
    pub fn link(&mut self, a: impl AsRef<str>, b: impl AsRef<str>) -> Result<&Link> {
        let (a, b) = (a.as_ref(), b.as_ref());
        let kind_a = self
            .kind_of(a)
            .ok_or_else(|| Error::UnknownEndpoint(a.to_string()))?;
        let kind_b = self
            .kind_of(b)
            .ok_or_else(|| Error::UnknownEndpoint(b.to_string()))?;

        if a == b {
            return Err(Error::InvalidLink(format!("'{a}' cannot link to itself")));
        }
        if kind_a == NodeKind::Host && kind_b == NodeKind::Host {
            return Err(Error::InvalidLink(format!(
                "'{a}' and '{b}' are both hosts; hosts attach to switches"
            )));
        }
        if self.links.iter().any(|l| l.joins(a, b)) {
            return Err(Error::DuplicateLink {
                a: a.to_string(),
                b: b.to_string(),
            });
        }

        let end_a = self.allocate_interface(a, kind_a)?;
        let end_b = self.allocate_interface(b, kind_b)?;
        self.links.push(Link { a: end_a, b: end_b });
        let index = self.links.len() - 1;
        Ok(&self.links[index])
    }

    fn allocate_interface(&mut self, node: &str, kind: NodeKind) -> Result<LinkEnd> {
        let unknown = || Error::UnknownEndpoint(node.to_string());
        let interface = match kind {
            NodeKind::Host => {
                let host = self
                    .hosts
                    .iter_mut()
                    .find(|h| h.name == node)
                    .ok_or_else(unknown)?;
                let name = format!("{}-eth{}", node, host.interfaces.len());
                host.interfaces.push(name.clone());
                name
            }
            NodeKind::Switch => {
                let switch = self
                    .switches
                    .iter_mut()
                    .find(|s| s.name == node)
                    .ok_or_else(unknown)?;
                let name = format!("{}-eth{}", node, switch.ports.len() + 1);
                switch.ports.push(name.clone());
                name
            }
        };
        Ok(LinkEnd {
            node: node.to_string(),
            kind,
            interface,
        })
    }

    fn check_new_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidConfig("node name cannot be empty".into()));
        }
        if self.kind_of(name).is_some() {
            return Err(Error::DuplicateNode(name.to_string()));
        }
        Ok(())
    }

    pub fn kind_of(&self, name: &str) -> Option<NodeKind> {
        if self.hosts.iter().any(|h| h.name == name) {
            Some(NodeKind::Host)
        } else if self.switches.iter().any(|s| s.name == name) {
            Some(NodeKind::Switch)
        } else {
            None
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn switch(&self, name: &str) -> Option<&Switch> {
        self.switches.iter().find(|s| s.name == name)
    }

    /// Every switch directly attached to `host`, in link-creation order.
    pub fn attached_switches(&self, host: &str) -> Vec<Attachment<'_>> {
        self.links
            .iter()
            .filter_map(|link| {
                let mine = link.end_for(host)?;
                if mine.kind != NodeKind::Host {
                    return None;
                }
                let peer = link.peer_of(host)?;
                Some(Attachment {
                    link,
                    switch: &peer.node,
                    host_interface: &mine.interface,
                    switch_port: &peer.interface,
                })
            })
            .collect()
    }

    /// Names of all controllers referenced by switch bindings.
    pub fn controller_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for sw in &self.switches {
            for c in &sw.controllers {
                if !names.contains(&c.as_str()) {
                    names.push(c);
                }
            }
        }
        names
    }

    /// Checks the invariants that must hold before traffic is expected to flow.
    pub fn validate(&self) -> Result<()> {
        for sw in &self.switches {
            if sw.controllers.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "switch '{}' has no controller binding",
                    sw.name
                )));
            }
        }
        for host in &self.hosts {
            if host.interfaces.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "host '{}' is not linked to any switch",
                    host.name
                )));
            }
        }
        Ok(())
    }
}
