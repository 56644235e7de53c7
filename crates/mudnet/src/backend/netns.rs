//! Linux backend: hosts are network namespaces, switches are Open vSwitch
//! bridges and links are veth pairs.

use async_trait::async_trait;
use mudnet_core::{
    BackendCapabilities, CommandOutput, ControllerEndpoint, Dpid, Error, Link, LinkEnd,
    NetworkBackend, NodeKind, Result, ServiceId,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const SERVICE_STOP_GRACE: Duration = Duration::from_secs(5);

pub struct NetnsBackend {
    ip_path: Option<PathBuf>,
    ovs_vsctl_path: Option<PathBuf>,
    /// Set when not running as root and `sudo` is available.
    sudo_path: Option<PathBuf>,
    capabilities: BackendCapabilities,
    services: Mutex<HashMap<ServiceId, Child>>,
}

impl NetnsBackend {
    pub fn new() -> Self {
        let sudo_path = if is_root() {
            None
        } else {
            which::which("sudo").ok()
        };

        Self {
            ip_path: which::which("ip").ok(),
            ovs_vsctl_path: which::which("ovs-vsctl").ok(),
            sudo_path,
            capabilities: BackendCapabilities {
                openflow: true,
                background_services: true,
                requires_root: true,
                max_hosts: None,
            },
            services: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self, program: &Path, args: &[String]) -> Command {
        match &self.sudo_path {
            Some(sudo) => {
                let mut cmd = Command::new(sudo);
                cmd.arg("-n").arg(program).args(args);
                cmd
            }
            None => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!(program = %program.display(), ?args, "running");
        let output = self
            .command(program, args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let output = self.run(program, args).await?;
        if !output.success() {
            return Err(Error::Backend(format!(
                "`{} {}` failed: {}",
                program.display(),
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    fn ip_bin(&self) -> Result<&PathBuf> {
        self.ip_path
            .as_ref()
            .ok_or_else(|| Error::Backend("`ip` binary not found in PATH".to_string()))
    }

    fn ovs_bin(&self) -> Result<&PathBuf> {
        self.ovs_vsctl_path
            .as_ref()
            .ok_or_else(|| Error::Backend("`ovs-vsctl` binary not found in PATH".to_string()))
    }

    async fn ip(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run_checked(self.ip_bin()?, &to_args(args)).await
    }

    async fn ovs(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run_checked(self.ovs_bin()?, &to_args(args)).await
    }

    async fn bridge_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .run(self.ovs_bin()?, &to_args(&["br-exists", name]))
            .await?;
        Ok(output.success())
    }

    async fn link_exists(&self, interface: &str) -> Result<bool> {
        let output = self
            .run(self.ip_bin()?, &to_args(&["link", "show", "dev", interface]))
            .await?;
        Ok(output.success())
    }

    /// Moves one end of a freshly created veth pair into place and brings it up.
    async fn attach_end(&self, end: &LinkEnd) -> Result<()> {
        match end.kind {
            NodeKind::Host => {
                self.ip(&["link", "set", &end.interface, "netns", &end.node])
                    .await?;
                self.ip(&[
                    "netns",
                    "exec",
                    &end.node,
                    "ip",
                    "link",
                    "set",
                    &end.interface,
                    "up",
                ])
                .await?;
            }
            NodeKind::Switch => {
                self.ovs(&["add-port", &end.node, &end.interface]).await?;
                self.ip(&["link", "set", &end.interface, "up"]).await?;
            }
        }
        Ok(())
    }
}

impl Default for NetnsBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkBackend for NetnsBackend {
    fn name(&self) -> &'static str {
        "netns"
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        self.ip_path.is_some() && self.ovs_vsctl_path.is_some()
    }

    async fn create_host(&self, name: &str) -> Result<()> {
        self.ip(&["netns", "add", name]).await?;
        self.ip(&["netns", "exec", name, "ip", "link", "set", "lo", "up"])
            .await?;
        Ok(())
    }

    async fn create_switch(&self, name: &str, dpid: Option<Dpid>) -> Result<()> {
        let mut args = vec![
            "add-br".to_string(),
            name.to_string(),
            "--".to_string(),
            "set".to_string(),
            "bridge".to_string(),
            name.to_string(),
            "fail-mode=secure".to_string(),
            "protocols=OpenFlow13".to_string(),
        ];
        if let Some(dpid) = dpid {
            args.push(format!("other-config:datapath-id={dpid}"));
        }
        self.run_checked(self.ovs_bin()?, &args).await?;
        Ok(())
    }

    async fn create_link(&self, link: &Link) -> Result<()> {
        self.ip(&[
            "link",
            "add",
            &link.a.interface,
            "type",
            "veth",
            "peer",
            "name",
            &link.b.interface,
        ])
        .await?;
        self.attach_end(&link.a).await?;
        self.attach_end(&link.b).await?;
        Ok(())
    }

    async fn start_switch(&self, name: &str, controllers: &[ControllerEndpoint]) -> Result<()> {
        let mut args = vec!["set-controller".to_string(), name.to_string()];
        args.extend(controllers.iter().map(ControllerEndpoint::ovs_target));
        self.run_checked(self.ovs_bin()?, &args).await?;
        Ok(())
    }

    async fn switch_connected(&self, name: &str) -> Result<bool> {
        let listing = self
            .ovs(&["--bare", "--columns=controller", "list", "bridge", name])
            .await?;
        for uuid in listing.stdout.split_whitespace() {
            let state = self
                .ovs(&["--bare", "--columns=is_connected", "list", "controller", uuid])
                .await?;
            if state.stdout.trim() == "true" {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn stop_switch(&self, name: &str) -> Result<()> {
        if self.bridge_exists(name).await? {
            self.ovs(&["del-controller", name]).await?;
        }
        Ok(())
    }

    async fn exec(&self, host: &str, argv: &[String]) -> Result<CommandOutput> {
        let mut args = to_args(&["netns", "exec", host]);
        args.extend_from_slice(argv);
        self.run(self.ip_bin()?, &args).await
    }

    async fn spawn(&self, host: &str, argv: &[String]) -> Result<ServiceId> {
        let mut args = to_args(&["netns", "exec", host]);
        args.extend_from_slice(argv);

        tracing::debug!(host, ?argv, "spawning service");
        let child = self
            .command(self.ip_bin()?, &args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Backend(format!("failed to spawn {argv:?} on {host}: {e}")))?;

        let id = ServiceId(format!("{host}-{}", uuid::Uuid::new_v4()));
        self.services.lock().await.insert(id.clone(), child);
        Ok(id)
    }

    async fn stop_service(&self, id: &ServiceId) -> Result<()> {
        let Some(mut child) = self.services.lock().await.remove(id) else {
            return Ok(());
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(SERVICE_STOP_GRACE, child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                tracing::warn!(service = %id, "service ignored SIGTERM, killing");
                child.kill().await?;
            }
        }
        Ok(())
    }

    async fn destroy_link(&self, link: &Link) -> Result<()> {
        for end in [&link.a, &link.b] {
            if end.kind == NodeKind::Switch && self.bridge_exists(&end.node).await? {
                self.ovs(&["--if-exists", "del-port", &end.node, &end.interface])
                    .await?;
            }
        }

        // Deleting either end of a veth pair removes both. Host ends live
        // inside their namespace and vanish with it.
        let root_end = [&link.a, &link.b]
            .into_iter()
            .find(|end| end.kind == NodeKind::Switch);
        if let Some(end) = root_end {
            if self.link_exists(&end.interface).await? {
                self.ip(&["link", "del", &end.interface]).await?;
            }
        } else {
            let host_end = &link.a;
            let exists = self
                .exec(
                    &host_end.node,
                    &to_args(&["ip", "link", "show", "dev", &host_end.interface]),
                )
                .await?;
            if exists.success() {
                self.ip(&[
                    "netns",
                    "exec",
                    &host_end.node,
                    "ip",
                    "link",
                    "del",
                    &host_end.interface,
                ])
                .await?;
            }
        }
        Ok(())
    }

    async fn destroy_switch(&self, name: &str) -> Result<()> {
        self.ovs(&["--if-exists", "del-br", name]).await?;
        Ok(())
    }

    async fn destroy_host(&self, name: &str) -> Result<()> {
        let output = self.run(self.ip_bin()?, &to_args(&["netns", "del", name])).await?;
        if output.success() || output.stderr.contains("No such file or directory") {
            return Ok(());
        }
        Err(Error::Backend(format!(
            "failed to delete namespace {name}: {}",
            output.stderr.trim()
        )))
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
