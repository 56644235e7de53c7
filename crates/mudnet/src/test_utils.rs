//! In-memory [`NetworkBackend`] for tests.
//!
//! [`FakeBackend`] tracks hosts, switches, links and services the way a real
//! backend would (creating something twice fails, destroying is idempotent)
//! and answers `exec` calls through a scriptable responder.

use async_trait::async_trait;
use mudnet_core::{
    BackendCapabilities, CommandOutput, ControllerEndpoint, Dpid, Error, Link, NetworkBackend,
    Result, ServiceId,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Produces the output of a command run on a host.
pub type Responder = Arc<dyn Fn(&str, &[String]) -> CommandOutput + Send + Sync>;

#[derive(Default)]
struct FakeState {
    hosts: BTreeSet<String>,
    switches: BTreeMap<String, Option<Dpid>>,
    links: BTreeSet<(String, String)>,
    controllers: BTreeMap<String, Vec<ControllerEndpoint>>,
    services: BTreeMap<ServiceId, (String, Vec<String>)>,
    commands: Vec<(String, Vec<String>)>,
    next_service: u64,
    failing_hosts: HashSet<String>,
    disconnected: HashSet<String>,
    failing_commands: Vec<String>,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
    responder: Mutex<Responder>,
    exec_delay: Mutex<Option<Duration>>,
    capabilities: BackendCapabilities,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            responder: Mutex::new(Arc::new(|_, _| CommandOutput::ok(""))),
            exec_delay: Mutex::new(None),
            capabilities: BackendCapabilities {
                openflow: true,
                background_services: true,
                requires_root: false,
                max_hosts: None,
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the function answering `exec` calls.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &[String]) -> CommandOutput + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(responder);
    }

    /// Makes every `exec` call sleep first, for timeout and cancellation tests.
    pub fn set_exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// `create_host` fails for this name.
    pub fn fail_host_creation(&self, name: &str) {
        self.state().failing_hosts.insert(name.to_string());
    }

    /// The switch never reports a control connection.
    pub fn disconnect_switch(&self, name: &str) {
        self.state().disconnected.insert(name.to_string());
    }

    /// Any `exec` whose joined argv contains `pattern` exits with status 1.
    pub fn fail_commands_matching(&self, pattern: &str) {
        self.state().failing_commands.push(pattern.to_string());
    }

    pub fn hosts(&self) -> Vec<String> {
        self.state().hosts.iter().cloned().collect()
    }

    pub fn switches(&self) -> Vec<String> {
        self.state().switches.keys().cloned().collect()
    }

    pub fn dpid_of(&self, switch: &str) -> Option<Dpid> {
        self.state().switches.get(switch).copied().flatten()
    }

    pub fn link_count(&self) -> usize {
        self.state().links.len()
    }

    pub fn controllers_of(&self, switch: &str) -> Vec<ControllerEndpoint> {
        self.state()
            .controllers
            .get(switch)
            .cloned()
            .unwrap_or_default()
    }

    pub fn running_services(&self) -> Vec<(String, Vec<String>)> {
        self.state().services.values().cloned().collect()
    }

    /// Every command executed on `host`, in order.
    pub fn commands_for(&self, host: &str) -> Vec<Vec<String>> {
        self.state()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, argv)| argv.clone())
            .collect()
    }

    /// Whether nothing created through this backend is still alive.
    pub fn is_empty(&self) -> bool {
        let state = self.state();
        state.hosts.is_empty()
            && state.switches.is_empty()
            && state.links.is_empty()
            && state.controllers.is_empty()
            && state.services.is_empty()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn link_key(link: &Link) -> (String, String) {
    let (a, b) = (link.a.interface.clone(), link.b.interface.clone());
    if a <= b { (a, b) } else { (b, a) }
}

#[async_trait]
impl NetworkBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn create_host(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_hosts.contains(name) {
            return Err(Error::Backend(format!("cannot create host {name}")));
        }
        if !state.hosts.insert(name.to_string()) {
            return Err(Error::DuplicateNode(name.to_string()));
        }
        Ok(())
    }

    async fn create_switch(&self, name: &str, dpid: Option<Dpid>) -> Result<()> {
        let mut state = self.state();
        if state.switches.contains_key(name) {
            return Err(Error::DuplicateNode(name.to_string()));
        }
        state.switches.insert(name.to_string(), dpid);
        Ok(())
    }

    async fn create_link(&self, link: &Link) -> Result<()> {
        let mut state = self.state();
        for end in [&link.a, &link.b] {
            if !state.hosts.contains(&end.node) && !state.switches.contains_key(&end.node) {
                return Err(Error::UnknownEndpoint(end.node.clone()));
            }
        }
        if !state.links.insert(link_key(link)) {
            return Err(Error::DuplicateLink {
                a: link.a.node.clone(),
                b: link.b.node.clone(),
            });
        }
        Ok(())
    }

    async fn start_switch(&self, name: &str, controllers: &[ControllerEndpoint]) -> Result<()> {
        let mut state = self.state();
        if !state.switches.contains_key(name) {
            return Err(Error::UnknownEndpoint(name.to_string()));
        }
        state
            .controllers
            .insert(name.to_string(), controllers.to_vec());
        Ok(())
    }

    async fn switch_connected(&self, name: &str) -> Result<bool> {
        let state = self.state();
        Ok(state.controllers.contains_key(name) && !state.disconnected.contains(name))
    }

    async fn stop_switch(&self, name: &str) -> Result<()> {
        self.state().controllers.remove(name);
        Ok(())
    }

    async fn exec(&self, host: &str, argv: &[String]) -> Result<CommandOutput> {
        let delay = *self.exec_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = {
            let mut state = self.state();
            if !state.hosts.contains(host) {
                return Err(Error::Backend(format!("no such host: {host}")));
            }
            state.commands.push((host.to_string(), argv.to_vec()));
            let joined = argv.join(" ");
            state.failing_commands.iter().any(|p| joined.contains(p))
        };
        if failing {
            return Ok(CommandOutput::failed(1, "injected failure"));
        }

        let responder = self
            .responder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(responder(host, argv))
    }

    async fn spawn(&self, host: &str, argv: &[String]) -> Result<ServiceId> {
        let mut state = self.state();
        if !state.hosts.contains(host) {
            return Err(Error::Backend(format!("no such host: {host}")));
        }
        state.next_service += 1;
        let id = ServiceId(format!("{host}-{}", state.next_service));
        state
            .services
            .insert(id.clone(), (host.to_string(), argv.to_vec()));
        Ok(id)
    }

    async fn stop_service(&self, id: &ServiceId) -> Result<()> {
        self.state().services.remove(id);
        Ok(())
    }

    async fn destroy_link(&self, link: &Link) -> Result<()> {
        self.state().links.remove(&link_key(link));
        Ok(())
    }

    async fn destroy_switch(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.switches.remove(name);
        state.controllers.remove(name);
        Ok(())
    }

    async fn destroy_host(&self, name: &str) -> Result<()> {
        self.state().hosts.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn services_are_tracked_until_stopped() {
        let backend = FakeBackend::new();
        backend.create_host("h5").await.unwrap();
        let dns = backend.spawn("h5", &["dnsmasq".to_string()]).await.unwrap();
        let web = backend
            .spawn("h5", &["http-server".to_string()])
            .await
            .unwrap();
        assert_ne!(dns, web);
        assert_eq!(backend.running_services().len(), 2);

        backend.stop_service(&dns).await.unwrap();
        assert_eq!(
            backend.running_services(),
            vec![("h5".to_string(), vec!["http-server".to_string()])]
        );
        backend.stop_service(&web).await.unwrap();
        backend.destroy_host("h5").await.unwrap();
        assert!(backend.is_empty());
    }
}
