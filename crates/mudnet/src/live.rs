//! The running instantiation of a topology.
//!
//! A [`LiveNetwork`] records every backend object the provisioner created so
//! that [`LiveNetwork::teardown`] can release exactly those, in reverse
//! dependency order, no matter how far provisioning got.

use mudnet_core::{
    CommandOutput, Error, HostConfig, Link, NetworkBackend, ResolvedPlan, Result, ServiceId,
    Topology,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub(crate) struct Resources {
    pub hosts: Vec<String>,
    pub switches: Vec<String>,
    pub started_switches: Vec<String>,
    pub links: Vec<Link>,
    pub services: Vec<ServiceId>,
}

impl Resources {
    fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.switches.is_empty()
            && self.started_switches.is_empty()
            && self.links.is_empty()
            && self.services.is_empty()
    }
}

/// Secondary errors collected while tearing a network down.
#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    pub errors: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct LiveNetwork {
    backend: Arc<dyn NetworkBackend>,
    topology: Topology,
    plan: ResolvedPlan,
    pub(crate) resources: Mutex<Resources>,
    cancel: CancellationToken,
}

impl LiveNetwork {
    pub(crate) fn new(
        backend: Arc<dyn NetworkBackend>,
        topology: Topology,
        plan: ResolvedPlan,
    ) -> Self {
        Self {
            backend,
            topology,
            plan,
            resources: Mutex::new(Resources::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn NetworkBackend> {
        &self.backend
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn plan(&self) -> &ResolvedPlan {
        &self.plan
    }

    pub fn host_config(&self, name: &str) -> Option<&HostConfig> {
        self.plan.host(name)
    }

    /// The primary IPv4 address of a host.
    pub fn address_of(&self, host: &str) -> Option<Ipv4Addr> {
        self.plan.host(host).and_then(HostConfig::primary_address)
    }

    /// Token cancelled when teardown starts. In-flight probes watch it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs a command on a host of this network.
    pub async fn exec(&self, host: &str, argv: &[String]) -> Result<CommandOutput> {
        if self.is_torn_down() {
            return Err(Error::Cancelled);
        }
        if self.topology.host(host).is_none() {
            return Err(Error::UnknownEndpoint(host.to_string()));
        }
        self.backend.exec(host, argv).await
    }

    /// Releases everything created for this network.
    ///
    /// Safe to call more than once and concurrently with running probes,
    /// which observe cancellation. Errors are logged and collected; they are
    /// never returned as failures.
    pub async fn teardown(&self) -> TeardownReport {
        self.cancel.cancel();

        let resources = {
            let mut guard = self.resources.lock().await;
            std::mem::take(&mut *guard)
        };
        if resources.is_empty() {
            return TeardownReport::default();
        }

        info!(backend = self.backend.name(), "tearing down network");
        let mut report = TeardownReport::default();
        let mut note = |what: String, result: Result<()>| {
            if let Err(e) = result {
                warn!(error = %e, "teardown: {what}");
                report.errors.push(format!("{what}: {e}"));
            }
        };

        for id in resources.services.iter().rev() {
            note(
                format!("stopping service {id}"),
                self.backend.stop_service(id).await,
            );
        }
        for name in resources.started_switches.iter().rev() {
            note(
                format!("stopping switch {name}"),
                self.backend.stop_switch(name).await,
            );
        }
        for link in resources.links.iter().rev() {
            note(
                format!("removing link {}-{}", link.a.node, link.b.node),
                self.backend.destroy_link(link).await,
            );
        }
        for name in resources.switches.iter().rev() {
            note(
                format!("removing switch {name}"),
                self.backend.destroy_switch(name).await,
            );
        }
        for name in resources.hosts.iter().rev() {
            note(
                format!("removing host {name}"),
                self.backend.destroy_host(name).await,
            );
        }

        report
    }
}

impl Drop for LiveNetwork {
    fn drop(&mut self) {
        if let Ok(resources) = self.resources.try_lock()
            && !resources.is_empty()
        {
            warn!("LiveNetwork dropped without teardown; backend objects leaked");
        }
    }
}
