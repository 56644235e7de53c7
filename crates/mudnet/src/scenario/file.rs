//! TOML scenario files.
//!
//! ```toml
//! name = "quarantine"
//! links = [["s1", "h1"], ["s1", "h2"]]
//!
//! [[hosts]]
//! name = "h1"
//! mac = "00:00:00:00:00:b1"
//! default_route = "10.0.0.8"
//!
//! [[switches]]
//! name = "s1"
//! dpid = 1
//! controllers = ["c1"]
//!
//! [[documents]]
//! kind = "device-association"
//! path = "device-association.json"
//!
//! [[groups]]
//! name = "baseline"
//! [[groups.probes]]
//! source = "h1"
//! protocol = "tcp"
//! target = "10.0.0.2"
//! port = 8010
//! expect = "success"
//! ```
//!
//! Hosts appear in the topology in file order, which fixes their default
//! addresses and MACs. Relative document paths resolve against the
//! directory holding the scenario file.

use super::{ConfigDocument, ProbeGroup, Scenario, ScenarioTiming};
use crate::controller::resources;
use crate::probe::ToolConfig;
use mudnet_core::{AddressPlan, ControllerEndpoint, Dpid, Error, HostPlan, Result, Topology};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Node pairs, in creation order.
    #[serde(default)]
    pub links: Vec<[String; 2]>,
    #[serde(default)]
    pub timing: ScenarioTiming,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub switches: Vec<SwitchEntry>,
    #[serde(default)]
    pub controllers: Vec<ControllerEntry>,
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
    #[serde(default)]
    pub groups: Vec<ProbeGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub name: String,
    #[serde(flatten)]
    pub plan: HostPlan,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchEntry {
    pub name: String,
    #[serde(default)]
    pub dpid: Option<Dpid>,
    #[serde(default)]
    pub controllers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerEntry {
    pub name: String,
    /// Empty means "the controller host given on the command line".
    #[serde(default)]
    pub endpoints: Vec<ControllerEndpoint>,
}

/// The standard policy documents and where they live on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    DeviceAssociation,
    ControllerClass,
    SdnmudConfig,
}

impl DocumentKind {
    pub fn resource(self) -> &'static str {
        match self {
            DocumentKind::DeviceAssociation => resources::DEVICE_ASSOCIATION,
            DocumentKind::ControllerClass => resources::CONTROLLER_CLASS,
            DocumentKind::SdnmudConfig => resources::SDNMUD_CONFIG,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentEntry {
    #[serde(default)]
    pub kind: Option<DocumentKind>,
    /// Explicit resource path; wins over `kind`.
    #[serde(default)]
    pub resource: Option<String>,
    pub path: PathBuf,
}

impl DocumentEntry {
    fn resource(&self) -> Result<String> {
        match (&self.resource, self.kind) {
            (Some(resource), _) => Ok(resource.clone()),
            (None, Some(kind)) => Ok(kind.resource().to_string()),
            (None, None) => Err(Error::InvalidConfig(format!(
                "document {} needs a kind or a resource",
                self.path.display()
            ))),
        }
    }
}

impl ScenarioFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Reads a scenario and the documents it references.
    pub fn load(path: &Path) -> Result<Scenario> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        let file = Self::parse(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        file.into_scenario(base)
    }

    pub fn into_scenario(self, base_dir: &Path) -> Result<Scenario> {
        let mut topology = Topology::new();
        let mut plan = AddressPlan::new();

        for host in &self.hosts {
            topology.add_host(&host.name)?;
            plan.hosts.insert(host.name.clone(), host.plan.clone());
        }
        for sw in &self.switches {
            topology.add_switch(&sw.name, sw.dpid)?;
        }
        for [a, b] in &self.links {
            topology.link(a, b)?;
        }
        for sw in &self.switches {
            for controller in &sw.controllers {
                topology.bind_controller(&sw.name, controller)?;
            }
        }
        for controller in &self.controllers {
            plan.controllers
                .insert(controller.name.clone(), controller.endpoints.clone());
        }

        let mut documents = Vec::with_capacity(self.documents.len());
        for entry in &self.documents {
            let path = base_dir.join(&entry.path);
            let text = std::fs::read_to_string(&path)
                .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
            let body = serde_json::from_str(&text)
                .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
            documents.push(ConfigDocument {
                resource: entry.resource()?,
                body,
            });
        }

        Ok(Scenario {
            name: self.name,
            topology,
            plan,
            documents,
            groups: self.groups,
            timing: self.timing,
            tools: self.tools,
        })
    }
}
