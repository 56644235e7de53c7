//! Network Provisioner: realizes a [`Topology`] and [`AddressPlan`] on a
//! [`NetworkBackend`].
//!
//! Provisioning runs in five committed steps: materialize nodes, realize
//! links, start switches and wait for their control connection, configure
//! hosts (concurrently across hosts), start background services. Any failure
//! tears down what was created and returns the first cause.

use crate::live::LiveNetwork;
use futures::future::try_join_all;
use mudnet_core::{
    AddressPlan, Error, HostConfig, Link, NetworkBackend, NodeKind, ResolvedPlan, Result,
    Topology,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on waiting for a switch's control connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_POLL: Duration = Duration::from_millis(500);

/// A command run on a host during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub argv: Vec<String>,
    /// Failures are logged and ignored.
    pub best_effort: bool,
}

impl HostCommand {
    fn required(argv: &[&str]) -> Self {
        Self {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            best_effort: false,
        }
    }

    fn best_effort(argv: &[&str]) -> Self {
        Self {
            best_effort: true,
            ..Self::required(argv)
        }
    }
}

pub struct Provisioner {
    backend: Arc<dyn NetworkBackend>,
    connect_timeout: Duration,
    connect_poll: Duration,
    shutdown: CancellationToken,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn NetworkBackend>) -> Self {
        Self {
            backend,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_poll: DEFAULT_CONNECT_POLL,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_poll_interval(mut self, interval: Duration) -> Self {
        self.connect_poll = interval;
        self
    }

    /// Abandons provisioning with [`Error::Cancelled`] once `token` fires.
    /// What was already created is torn down.
    pub fn shutdown_on(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Builds the network. On error nothing created along the way survives.
    pub async fn provision(&self, topology: &Topology, plan: &AddressPlan) -> Result<LiveNetwork> {
        let resolved = plan.resolve(topology)?;

        if let Some(max) = self.backend.capabilities().max_hosts
            && topology.hosts().len() > max
        {
            return Err(Error::Provision(format!(
                "backend {} supports at most {max} hosts",
                self.backend.name()
            )));
        }
        let wants_services = resolved.hosts.iter().any(|h| !h.services.is_empty());
        if wants_services && !self.backend.capabilities().background_services {
            return Err(Error::Provision(format!(
                "backend {} cannot run background services",
                self.backend.name()
            )));
        }

        let live = LiveNetwork::new(self.backend.clone(), topology.clone(), resolved);
        info!(
            backend = self.backend.name(),
            hosts = topology.hosts().len(),
            switches = topology.switches().len(),
            links = topology.links().len(),
            "provisioning network"
        );

        let built = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = self.build(&live) => result,
        };
        match built {
            Ok(()) => {
                info!("network provisioned");
                Ok(live)
            }
            Err(e) => {
                warn!(error = %e, "provisioning failed, tearing down");
                let report = live.teardown().await;
                for secondary in &report.errors {
                    debug!(error = %secondary, "secondary teardown error");
                }
                Err(e)
            }
        }
    }

    async fn build(&self, live: &LiveNetwork) -> Result<()> {
        let topology = live.topology();
        let backend = &self.backend;

        for host in topology.hosts() {
            backend
                .create_host(&host.name)
                .await
                .map_err(|e| provision_error(format!("creating host {}", host.name), e))?;
            live.resources.lock().await.hosts.push(host.name.clone());
        }
        for sw in topology.switches() {
            backend
                .create_switch(&sw.name, sw.dpid)
                .await
                .map_err(|e| provision_error(format!("creating switch {}", sw.name), e))?;
            live.resources.lock().await.switches.push(sw.name.clone());
        }

        // Host links go in per host in link-creation order, which is what
        // numbers their interfaces. Switch trunks follow.
        for host in topology.hosts() {
            for attachment in topology.attached_switches(&host.name) {
                debug!(
                    host = %host.name,
                    switch = attachment.switch,
                    interface = attachment.host_interface,
                    port = attachment.switch_port,
                    "wiring host"
                );
                self.create_link(live, attachment.link).await?;
            }
        }
        for link in topology.links().iter().filter(|l| is_trunk(l)) {
            self.create_link(live, link).await?;
        }

        for sw in topology.switches() {
            let endpoints = live
                .plan()
                .switches
                .get(&sw.name)
                .map(Vec::as_slice)
                .unwrap_or_default();
            backend
                .start_switch(&sw.name, endpoints)
                .await
                .map_err(|e| provision_error(format!("starting switch {}", sw.name), e))?;
            live.resources
                .lock()
                .await
                .started_switches
                .push(sw.name.clone());
        }
        for sw in topology.switches() {
            self.wait_connected(&sw.name).await?;
        }

        try_join_all(
            live.plan()
                .hosts
                .iter()
                .map(|host| configure_host(backend.as_ref(), host)),
        )
        .await?;

        self.start_services(live, live.plan()).await
    }

    async fn create_link(&self, live: &LiveNetwork, link: &Link) -> Result<()> {
        self.backend.create_link(link).await.map_err(|e| {
            provision_error(format!("linking {} and {}", link.a.node, link.b.node), e)
        })?;
        live.resources.lock().await.links.push(link.clone());
        Ok(())
    }

    async fn wait_connected(&self, switch: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        loop {
            if self.backend.switch_connected(switch).await? {
                debug!(switch, "switch connected to controller");
                return Ok(());
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(Error::ControllerUnreachable(format!(
                    "switch {switch} did not connect within {:?}",
                    self.connect_timeout
                )));
            }
            tokio::time::sleep_until(deadline.min(now + self.connect_poll)).await;
        }
    }

    async fn start_services(&self, live: &LiveNetwork, plan: &ResolvedPlan) -> Result<()> {
        for host in &plan.hosts {
            for service in &host.services {
                info!(host = %host.name, service = %service.name, "starting service");
                let id = self
                    .backend
                    .spawn(&host.name, &service.command)
                    .await
                    .map_err(|e| {
                        provision_error(
                            format!("starting service {} on {}", service.name, host.name),
                            e,
                        )
                    })?;
                live.resources.lock().await.services.push(id);
            }
        }
        Ok(())
    }
}

fn is_trunk(link: &Link) -> bool {
    link.a.kind == NodeKind::Switch && link.b.kind == NodeKind::Switch
}

fn provision_error(context: String, err: Error) -> Error {
    match err {
        Error::ControllerUnreachable(_) | Error::Provision(_) => err,
        other => Error::Provision(format!("{context}: {other}")),
    }
}

async fn configure_host(backend: &dyn NetworkBackend, host: &HostConfig) -> Result<()> {
    debug!(host = %host.name, "configuring host");
    for cmd in host_commands(host) {
        let output = backend
            .exec(&host.name, &cmd.argv)
            .await
            .map_err(|e| provision_error(format!("configuring {}", host.name), e))?;
        if output.success() {
            continue;
        }
        if cmd.best_effort {
            debug!(host = %host.name, argv = ?cmd.argv, "best-effort command failed");
            continue;
        }
        return Err(Error::Provision(format!(
            "`{}` on {} failed: {}",
            cmd.argv.join(" "),
            host.name,
            output.combined().trim()
        )));
    }
    Ok(())
}

/// The commands that bring a host to its resolved configuration, in order.
pub fn host_commands(host: &HostConfig) -> Vec<HostCommand> {
    let mut cmds = Vec::new();

    for iface in &host.interfaces {
        let name = iface.name.as_str();
        if let Some(mac) = iface.mac {
            let mac = mac.to_string();
            cmds.push(HostCommand::required(&["ip", "link", "set", "dev", name, "down"]));
            cmds.push(HostCommand::required(&[
                "ip", "link", "set", "dev", name, "address", &mac,
            ]));
        }
        cmds.push(HostCommand::required(&["ip", "addr", "flush", "dev", name]));
        for cidr in &iface.addresses {
            let cidr = cidr.to_string();
            cmds.push(HostCommand::required(&["ip", "addr", "add", &cidr, "dev", name]));
        }
        cmds.push(HostCommand::required(&["ip", "link", "set", "dev", name, "up"]));
    }

    if let Some(router) = &host.router {
        let subnet = router.local_subnet.to_string();
        cmds.push(HostCommand::required(&[
            "sysctl",
            "-w",
            "net.ipv4.ip_forward=1",
        ]));
        for table in ["filter", "nat", "mangle"] {
            cmds.push(HostCommand::required(&["iptables", "-t", table, "-F"]));
        }
        cmds.push(HostCommand::required(&["iptables", "-X"]));
        cmds.push(HostCommand::required(&[
            "iptables",
            "-t",
            "nat",
            "-A",
            "POSTROUTING",
            "-o",
            &router.wan_interface,
            "-s",
            &subnet,
            "-j",
            "MASQUERADE",
        ]));
        for route in &router.routes {
            let dest = route.destination.to_string();
            let mut argv = vec!["ip", "route", "replace", dest.as_str()];
            let via = route.via.map(|v| v.to_string());
            if let Some(via) = &via {
                argv.extend(["via", via.as_str()]);
            }
            argv.extend(["dev", route.interface.as_str()]);
            cmds.push(HostCommand::required(&argv));
        }
    }

    if let Some(route) = &host.default_route {
        let via = route.via.to_string();
        cmds.push(HostCommand::best_effort(&["ip", "route", "del", "default"]));
        cmds.push(HostCommand::required(&[
            "ip",
            "route",
            "add",
            "default",
            "via",
            &via,
            "dev",
            &route.interface,
        ]));
    }

    cmds
}
