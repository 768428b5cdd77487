//! Cluster node coordinator
//!
//! A single actor owns every node index, the handshake and upgrade timers,
//! the active configuration and migration, and the operator-facing
//! [`ResourceState`]. Timers post messages back into the actor's own
//! mailbox, so all state is touched from one task.

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, UpdateClusterError};
use crate::messages::{NewNodeTemplateReply, NodeStartUpConfiguration, TemplateStatistics};
use crate::resource_state::{overall_direction, GateInputs, MigrationStep, ResourceState};
use crate::seams::{NodeMessenger, RandomSource};
use crate::selection::{possible_templates, weighted_pick};
use crate::upgrade::{select_for_upgrade, UpgradeGroup};
use ccp_migration::{
    MigrationResourceState, OrchestratorError, OrchestratorHandle, OrchestratorNotification,
    ResourceUpgrade, Side, UpgradeReply,
};
use ccp_model::{
    Configuration, ConfigurationId, ConfigurationState, ConfigurationStore, Migration,
    MigrationDirection, MigrationLogRecord, MigrationState, NodeAddress, NodeDescription, NodeId,
    NodeTemplate,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Mailbox messages, including the ones timers post
#[derive(Debug)]
pub(crate) enum Message {
    MemberUp {
        address: NodeAddress,
        roles: Vec<String>,
    },
    MemberDown {
        address: NodeAddress,
    },
    LeaderChanged {
        leader: Option<NodeAddress>,
    },
    RoleLeaderChanged {
        role: String,
        leader: Option<NodeAddress>,
    },
    NodeDescription(NodeDescription),
    NewNodeTemplate {
        container_type: String,
        runtime: String,
        node_id: NodeId,
        reply: oneshot::Sender<NewNodeTemplateReply>,
    },
    Orchestrator(OrchestratorNotification),
    UpdateCluster {
        configuration_id: ConfigurationId,
        reply: oneshot::Sender<Result<Migration, UpdateClusterError>>,
    },
    CancelMigration {
        reply: oneshot::Sender<bool>,
    },
    FinishMigration {
        reply: oneshot::Sender<bool>,
    },
    UpdateNodes {
        target: Side,
        reply: oneshot::Sender<bool>,
    },
    UpgradeResources {
        requests: Vec<ResourceUpgrade>,
        reply: oneshot::Sender<bool>,
    },
    UpgradeNode {
        address: NodeAddress,
        reply: oneshot::Sender<bool>,
    },
    ResourceState {
        reply: oneshot::Sender<ResourceState>,
    },
    ActiveNodes {
        reply: oneshot::Sender<Vec<NodeDescription>>,
    },
    TemplatesStatistics {
        reply: oneshot::Sender<Vec<TemplateStatistics>>,
    },
    Reload {
        reply: oneshot::Sender<()>,
    },
    RequestDescription {
        address: NodeAddress,
        attempt: u32,
    },
    RequestTimeout {
        node_id: NodeId,
    },
    UpgradeSweep,
    Shutdown,
}

/// Cloneable handle to a running coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<Message>,
}

impl CoordinatorHandle {
    async fn send(&self, message: Message) -> Result<(), CoordinatorError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| CoordinatorError::MailboxClosed)
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> Result<T, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.send(message(reply)).await?;
        response.await.map_err(|_| CoordinatorError::NoReply)
    }

    /// A member joined the cluster
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn member_up(
        &self,
        address: NodeAddress,
        roles: Vec<String>,
    ) -> Result<(), CoordinatorError> {
        self.send(Message::MemberUp { address, roles }).await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn member_down(&self, address: NodeAddress) -> Result<(), CoordinatorError> {
        self.send(Message::MemberDown { address }).await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn leader_changed(&self, leader: Option<NodeAddress>) -> Result<(), CoordinatorError> {
        self.send(Message::LeaderChanged { leader }).await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn role_leader_changed(
        &self,
        role: impl Into<String>,
        leader: Option<NodeAddress>,
    ) -> Result<(), CoordinatorError> {
        self.send(Message::RoleLeaderChanged {
            role: role.into(),
            leader,
        })
        .await
    }

    /// A node reported its description
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn node_description(
        &self,
        description: NodeDescription,
    ) -> Result<(), CoordinatorError> {
        self.send(Message::NodeDescription(description)).await
    }

    /// Choose a template for a node about to start
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    /// - `CoordinatorError::NoReply` if the request was dropped unanswered
    pub async fn new_node_template(
        &self,
        container_type: impl Into<String>,
        runtime: impl Into<String>,
        node_id: NodeId,
    ) -> Result<NewNodeTemplateReply, CoordinatorError> {
        let container_type = container_type.into();
        let runtime = runtime.into();
        self.request(|reply| Message::NewNodeTemplate {
            container_type,
            runtime,
            node_id,
            reply,
        })
        .await
    }

    /// Forward a notification of the migration orchestrator
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn orchestrator_notification(
        &self,
        notification: OrchestratorNotification,
    ) -> Result<(), CoordinatorError> {
        self.send(Message::Orchestrator(notification)).await
    }

    /// Start a migration of the cluster to `configuration_id`
    ///
    /// # Errors
    /// Every refusal reason of [`UpdateClusterError`]; an unreachable
    /// coordinator is reported as `UpdateClusterError::Unavailable`.
    pub async fn update_cluster(
        &self,
        configuration_id: ConfigurationId,
    ) -> Result<Migration, UpdateClusterError> {
        match self
            .request(|reply| Message::UpdateCluster {
                configuration_id,
                reply,
            })
            .await
        {
            Ok(result) => result,
            Err(e) => Err(UpdateClusterError::Unavailable(e.to_string())),
        }
    }

    /// Roll the active migration back; `false` when not allowed now
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    /// - `CoordinatorError::NoReply` if the coordinator stopped while handling it
    pub async fn cancel_migration(&self) -> Result<bool, CoordinatorError> {
        self.request(|reply| Message::CancelMigration { reply }).await
    }

    /// Complete the active migration; `false` when not allowed now
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    /// - `CoordinatorError::NoReply` if the coordinator stopped while handling it
    pub async fn finish_migration(&self) -> Result<bool, CoordinatorError> {
        self.request(|reply| Message::FinishMigration { reply }).await
    }

    /// Switch the cluster's nodes to one side of the active migration
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    /// - `CoordinatorError::NoReply` if the coordinator stopped while handling it
    pub async fn update_nodes(&self, target: Side) -> Result<bool, CoordinatorError> {
        self.request(|reply| Message::UpdateNodes { target, reply })
            .await
    }

    /// Move the listed resources; `false` when not allowed or declined
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    /// - `CoordinatorError::NoReply` if the coordinator stopped while handling it
    pub async fn upgrade_resources(
        &self,
        requests: Vec<ResourceUpgrade>,
    ) -> Result<bool, CoordinatorError> {
        self.request(|reply| Message::UpgradeResources { requests, reply })
            .await
    }

    /// Restart a single node; `false` for unknown nodes
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn upgrade_node(&self, address: NodeAddress) -> Result<bool, CoordinatorError> {
        self.request(|reply| Message::UpgradeNode { address, reply })
            .await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn resource_state(&self) -> Result<ResourceState, CoordinatorError> {
        self.request(|reply| Message::ResourceState { reply }).await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn active_nodes(&self) -> Result<Vec<NodeDescription>, CoordinatorError> {
        self.request(|reply| Message::ActiveNodes { reply }).await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    pub async fn templates_statistics(&self) -> Result<Vec<TemplateStatistics>, CoordinatorError> {
        self.request(|reply| Message::TemplatesStatistics { reply })
            .await
    }

    /// Re-read the active configuration and migration from the store
    ///
    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator stopped
    /// - `CoordinatorError::NoReply` if reading the store failed fatally
    pub async fn reload(&self) -> Result<(), CoordinatorError> {
        self.request(|reply| Message::Reload { reply }).await
    }

    /// # Errors
    /// - `CoordinatorError::MailboxClosed` if the coordinator already stopped
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.send(Message::Shutdown).await
    }
}

/// Cluster coordinator, ready to be spawned
pub struct ClusterCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn ConfigurationStore>,
    orchestrator: OrchestratorHandle,
    messenger: Arc<dyn NodeMessenger>,
    random: Box<dyn RandomSource>,
}

impl ClusterCoordinator {
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn ConfigurationStore>,
        orchestrator: OrchestratorHandle,
        messenger: Arc<dyn NodeMessenger>,
        random: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            store,
            orchestrator,
            messenger,
            random,
        }
    }

    /// Start the coordinator on the current runtime
    ///
    /// The coordinator stops when every handle is dropped, on
    /// [`CoordinatorHandle::shutdown`], or on a fatal error.
    #[must_use]
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<Result<(), CoordinatorError>>) {
        let (sender, mailbox) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let actor = Actor::new(self, sender.downgrade());
        let task = tokio::spawn(actor.run(mailbox));
        (CoordinatorHandle { sender }, task)
    }
}

#[derive(Debug)]
struct AwaitingNode {
    node_id: NodeId,
    template_code: String,
    timer: AbortHandle,
}

#[derive(Debug)]
struct UpgradingNode {
    template_code: String,
    since: Instant,
}

struct Actor {
    config: CoordinatorConfig,
    store: Arc<dyn ConfigurationStore>,
    orchestrator: OrchestratorHandle,
    messenger: Arc<dyn NodeMessenger>,
    random: Box<dyn RandomSource>,
    timers: mpsc::WeakSender<Message>,

    configuration: Option<Configuration>,
    migration: Option<Migration>,
    nodes: HashMap<NodeAddress, NodeDescription>,
    by_template: HashMap<String, BTreeSet<NodeAddress>>,
    /// Pending handshakes; `None` once the retry budget is spent
    handshakes: HashMap<NodeAddress, Option<AbortHandle>>,
    awaiting: Vec<AwaitingNode>,
    upgrading: HashMap<NodeId, UpgradingNode>,
    sweep_timer: Option<AbortHandle>,
    leader: Option<NodeAddress>,
    role_leaders: HashMap<String, NodeAddress>,
    resource_state: ResourceState,
}

/// Whether `node` runs a configuration the active one cannot keep
fn node_is_obsolete(configuration: Option<&Configuration>, node: &NodeDescription) -> bool {
    if node.node_template.is_empty() {
        return false;
    }
    configuration.is_some_and(|c| {
        node.configuration_id != c.id && !c.is_compatible_with(&node.node_template, node.configuration_id)
    })
}

impl Actor {
    fn new(coordinator: ClusterCoordinator, timers: mpsc::WeakSender<Message>) -> Self {
        Self {
            config: coordinator.config,
            store: coordinator.store,
            orchestrator: coordinator.orchestrator,
            messenger: coordinator.messenger,
            random: coordinator.random,
            timers,
            configuration: None,
            migration: None,
            nodes: HashMap::new(),
            by_template: HashMap::new(),
            handshakes: HashMap::new(),
            awaiting: Vec::new(),
            upgrading: HashMap::new(),
            sweep_timer: None,
            leader: None,
            role_leaders: HashMap::new(),
            resource_state: ResourceState::checking(),
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Message>) -> Result<(), CoordinatorError> {
        tracing::info!("coordinator started");
        if let Err(e) = self.reload().await {
            tracing::error!(error = %e, "failed to read cluster state");
        }

        while let Some(message) = mailbox.recv().await {
            if matches!(message, Message::Shutdown) {
                break;
            }
            if let Err(e) = self.handle(message).await {
                if e.is_fatal() {
                    tracing::error!(error = %e, "coordinator stopped");
                    self.cancel_timers();
                    return Err(e);
                }
                tracing::error!(error = %e, "coordinator operation failed");
            }
        }

        self.cancel_timers();
        tracing::info!("coordinator stopped");
        Ok(())
    }

    async fn handle(&mut self, message: Message) -> Result<(), CoordinatorError> {
        match message {
            Message::MemberUp { address, roles } => self.on_member_up(address, roles),
            Message::MemberDown { address } => self.on_member_down(&address),
            Message::LeaderChanged { leader } => self.on_leader_changed(leader),
            Message::RoleLeaderChanged { role, leader } => self.on_role_leader_changed(role, leader),
            Message::NodeDescription(description) => self.on_node_description(description),
            Message::RequestDescription { address, attempt } => {
                self.request_description(address, attempt);
            }
            Message::RequestTimeout { node_id } => self.on_request_timeout(node_id),
            Message::UpgradeSweep => self.sweep(),
            Message::NewNodeTemplate {
                container_type,
                runtime,
                node_id,
                reply,
            } => {
                let answer = self.on_new_node_template(&container_type, &runtime, node_id);
                let _ = reply.send(answer);
            }
            Message::UpgradeNode { address, reply } => {
                let _ = reply.send(self.on_upgrade_node(&address));
            }
            Message::ResourceState { reply } => {
                let _ = reply.send(self.resource_state.clone());
            }
            Message::ActiveNodes { reply } => {
                let _ = reply.send(self.active_nodes());
            }
            Message::TemplatesStatistics { reply } => {
                let _ = reply.send(self.templates_statistics());
            }
            Message::Reload { reply } => {
                self.reload().await?;
                let _ = reply.send(());
            }
            Message::Orchestrator(notification) => {
                return self.on_orchestrator_notification(notification).await;
            }
            Message::UpdateCluster {
                configuration_id,
                reply,
            } => {
                let result = self.on_update_cluster(configuration_id).await;
                if let Err(e) = &result {
                    tracing::warn!(%configuration_id, error = %e, "cluster update refused");
                }
                let _ = reply.send(result);
            }
            Message::CancelMigration { reply } => {
                let result = self.close_migration(MigrationState::Failed).await;
                let _ = reply.send(matches!(result, Ok(true)));
                return result.map(drop);
            }
            Message::FinishMigration { reply } => {
                let result = self.close_migration(MigrationState::Completed).await;
                let _ = reply.send(matches!(result, Ok(true)));
                return result.map(drop);
            }
            Message::UpdateNodes { target, reply } => {
                let result = self.on_update_nodes(target).await;
                let _ = reply.send(matches!(result, Ok(true)));
                return result.map(drop);
            }
            Message::UpgradeResources { requests, reply } => {
                let result = self.on_upgrade_resources(requests).await;
                let _ = reply.send(matches!(result, Ok(true)));
                return result.map(drop);
            }
            Message::Shutdown => {}
        }
        Ok(())
    }

    fn schedule(&self, delay: Duration, message: Message) -> AbortHandle {
        let mailbox = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(message).await;
            }
        })
        .abort_handle()
    }

    fn cancel_timers(&mut self) {
        for timer in self.handshakes.values().flatten() {
            timer.abort();
        }
        for awaiting in &self.awaiting {
            awaiting.timer.abort();
        }
        if let Some(timer) = self.sweep_timer.take() {
            timer.abort();
        }
    }

    async fn reload(&mut self) -> Result<(), CoordinatorError> {
        self.configuration = self.store.active_configuration().await?;
        self.migration = self.store.active_migration().await?;
        match &self.configuration {
            Some(configuration) => {
                tracing::info!(configuration_id = %configuration.id, "active configuration loaded");
            }
            None => tracing::warn!("there is no active configuration"),
        }
        self.refresh_obsolescence();
        self.refresh_gates();
        Ok(())
    }

    // Membership

    fn on_member_up(&mut self, address: NodeAddress, roles: Vec<String>) {
        tracing::info!(%address, "member up");
        if !self.nodes.contains_key(&address) {
            let mut node = NodeDescription::placeholder(address.clone());
            node.roles = roles;
            node.is_cluster_leader = self.leader.as_ref() == Some(&address);
            node.leader_in_roles = self.roles_led_by(&address);
            self.nodes.insert(address.clone(), node);
        }

        if let Some(Some(timer)) = self.handshakes.insert(address.clone(), None) {
            timer.abort();
        }
        self.request_description(address, 1);
    }

    fn request_description(&mut self, address: NodeAddress, attempt: u32) {
        if !self.handshakes.contains_key(&address) {
            return;
        }

        tracing::debug!(%address, attempt, "requesting node description");
        self.messenger.request_description(&address);

        let max_requests = self.config.new_node_request_description_notification_max_requests;
        let timer = if attempt < max_requests {
            Some(self.schedule(
                self.config.request_description_timeout(),
                Message::RequestDescription {
                    address: address.clone(),
                    attempt: attempt + 1,
                },
            ))
        } else {
            tracing::warn!(%address, attempts = attempt, "node did not describe itself");
            None
        };
        self.handshakes.insert(address, timer);
    }

    fn on_member_down(&mut self, address: &NodeAddress) {
        let handshake = self.handshakes.remove(address);
        if let Some(Some(timer)) = &handshake {
            timer.abort();
        }

        match self.nodes.remove(address) {
            Some(node) => {
                tracing::info!(%address, template = %node.node_template, "member down");
                self.unindex(address, &node.node_template);
            }
            None if handshake.is_none() => tracing::warn!(%address, "unknown member went down"),
            None => {}
        }
        self.refresh_gates();
    }

    fn unindex(&mut self, address: &NodeAddress, template_code: &str) {
        if let Some(addresses) = self.by_template.get_mut(template_code) {
            addresses.remove(address);
            if addresses.is_empty() {
                self.by_template.remove(template_code);
            }
        }
    }

    fn on_node_description(&mut self, mut description: NodeDescription) {
        let Some(address) = description.node_address.clone() else {
            tracing::warn!(template = %description.node_template, "node description without address");
            return;
        };
        let Some(timer) = self.handshakes.remove(&address) else {
            tracing::warn!(%address, "node description from unknown node");
            return;
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        if let Some(node_id) = description.node_id {
            self.upgrading.remove(&node_id);
            if let Some(position) = self.awaiting.iter().position(|a| a.node_id == node_id) {
                self.awaiting.remove(position).timer.abort();
            }
        }

        description.is_obsolete = node_is_obsolete(self.configuration.as_ref(), &description);
        description.is_cluster_leader = self.leader.as_ref() == Some(&address);
        description.leader_in_roles = self.roles_led_by(&address);

        if let Some(previous) = self.nodes.remove(&address) {
            self.unindex(&address, &previous.node_template);
        }
        if !description.node_template.is_empty() {
            self.by_template
                .entry(description.node_template.clone())
                .or_default()
                .insert(address.clone());
        }

        tracing::info!(
            %address,
            template = %description.node_template,
            configuration_id = %description.configuration_id,
            obsolete = description.is_obsolete,
            "node described itself"
        );
        self.nodes.insert(address, description);

        self.sweep();
        self.refresh_gates();
    }

    fn on_leader_changed(&mut self, leader: Option<NodeAddress>) {
        if let Some(previous) = self.leader.take() {
            if let Some(node) = self.nodes.get_mut(&previous) {
                node.is_cluster_leader = false;
            }
        }
        if let Some(address) = &leader {
            if let Some(node) = self.nodes.get_mut(address) {
                node.is_cluster_leader = true;
            }
        }
        tracing::info!(leader = ?leader, "cluster leader changed");
        self.leader = leader;
    }

    fn on_role_leader_changed(&mut self, role: String, leader: Option<NodeAddress>) {
        if role.is_empty() {
            tracing::warn!(leader = ?leader, "role leader changed for an empty role");
            return;
        }

        if let Some(previous) = self.role_leaders.remove(&role) {
            if let Some(node) = self.nodes.get_mut(&previous) {
                node.leader_in_roles.retain(|r| r != &role);
            }
        }
        if let Some(address) = leader {
            if let Some(node) = self.nodes.get_mut(&address) {
                if !node.leader_in_roles.contains(&role) {
                    node.leader_in_roles.push(role.clone());
                }
            }
            self.role_leaders.insert(role, address);
        }
    }

    fn roles_led_by(&self, address: &NodeAddress) -> Vec<String> {
        let mut roles: Vec<String> = self
            .role_leaders
            .iter()
            .filter(|(_, leader)| *leader == address)
            .map(|(role, _)| role.clone())
            .collect();
        roles.sort();
        roles
    }

    // New nodes

    fn template_count(&self, code: &str) -> usize {
        let live = self.by_template.get(code).map_or(0, BTreeSet::len);
        let starting = self.awaiting.iter().filter(|a| a.template_code == code).count();
        live + starting
    }

    fn on_new_node_template(
        &mut self,
        container_type: &str,
        runtime: &str,
        node_id: NodeId,
    ) -> NewNodeTemplateReply {
        let wait = NewNodeTemplateReply::Wait(self.config.full_cluster_wait_timeout());
        let Some(configuration) = self.configuration.as_ref() else {
            tracing::warn!(%node_id, "new node asked for a template without an active configuration");
            return wait;
        };

        let candidates: Vec<NodeTemplate> =
            possible_templates(configuration, container_type, runtime, |code| {
                self.template_count(code)
            })
            .into_iter()
            .cloned()
            .collect();
        if candidates.is_empty() {
            return wait;
        }

        let configuration_id = configuration.id;
        let mut seeds = configuration.settings.seed_addresses.clone();
        let package_source = configuration.settings.nuget_feed.clone();

        let dice = self.random.next_f64();
        let references: Vec<&NodeTemplate> = candidates.iter().collect();
        let Some(template) = weighted_pick(&references, dice) else {
            return wait;
        };
        self.random.shuffle(&mut seeds);

        let timer = self.schedule(
            self.config.new_node_join_timeout(),
            Message::RequestTimeout { node_id },
        );
        self.awaiting.push(AwaitingNode {
            node_id,
            template_code: template.code.clone(),
            timer,
        });

        tracing::info!(%node_id, template = %template.code, container_type, runtime, "template assigned to new node");
        NewNodeTemplateReply::StartUp(NodeStartUpConfiguration {
            node_template: template.code.clone(),
            configuration_id,
            configuration: template.configuration.clone(),
            seeds,
            packages: template
                .packages_to_install
                .get(runtime)
                .cloned()
                .unwrap_or_default(),
            package_source,
        })
    }

    fn on_request_timeout(&mut self, node_id: NodeId) {
        if let Some(position) = self.awaiting.iter().position(|a| a.node_id == node_id) {
            let awaiting = self.awaiting.remove(position);
            tracing::warn!(%node_id, template = %awaiting.template_code, "new node did not join in time");
        }
    }

    // Upgrades

    fn refresh_obsolescence(&mut self) {
        let configuration = self.configuration.as_ref();
        for node in self.nodes.values_mut() {
            node.is_obsolete = node_is_obsolete(configuration, node);
        }
    }

    fn sweep(&mut self) {
        if let Some(timer) = self.sweep_timer.take() {
            timer.abort();
        }

        let now = Instant::now();
        let timeout = self.config.upgrade_timeout();
        self.upgrading.retain(|node_id, upgrading| {
            let waiting = now.duration_since(upgrading.since) < timeout;
            if !waiting {
                tracing::warn!(%node_id, template = %upgrading.template_code, "upgraded node did not rejoin in time");
            }
            waiting
        });

        if let Some(configuration) = self.configuration.as_ref() {
            let mut shutdowns = Vec::new();
            for (code, addresses) in &self.by_template {
                let group = UpgradeGroup {
                    nodes: addresses.iter().filter_map(|a| self.nodes.get(a)).collect(),
                    minimum_required: configuration
                        .node_template(code)
                        .map(|t| t.minimum_required_instances),
                    in_flight: self
                        .upgrading
                        .values()
                        .filter(|u| &u.template_code == code)
                        .count(),
                };
                let selected = select_for_upgrade(&group, self.config.upgradable_part_percent, |n| {
                    n.node_id.is_some_and(|id| self.upgrading.contains_key(&id))
                });
                for node in selected {
                    if let (Some(node_id), Some(address)) = (node.node_id, node.node_address.clone()) {
                        shutdowns.push((node_id, address, code.clone()));
                    }
                }
            }

            for (node_id, address, template_code) in shutdowns {
                tracing::info!(%address, template = %template_code, "shutting down obsolete node");
                self.messenger.shutdown(&address);
                self.upgrading.insert(
                    node_id,
                    UpgradingNode {
                        template_code,
                        since: now,
                    },
                );
            }
        }

        if !self.upgrading.is_empty() {
            self.sweep_timer = Some(self.schedule(
                timeout + Duration::from_secs(1),
                Message::UpgradeSweep,
            ));
        }
    }

    fn on_upgrade_node(&self, address: &NodeAddress) -> bool {
        if self.nodes.contains_key(address) {
            tracing::info!(%address, "manual node upgrade");
            self.messenger.shutdown(address);
            true
        } else {
            tracing::warn!(%address, "manual upgrade of unknown node");
            false
        }
    }

    // Reports

    fn active_nodes(&self) -> Vec<NodeDescription> {
        let mut nodes: Vec<NodeDescription> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_address.cmp(&b.node_address));
        nodes
    }

    fn templates_statistics(&self) -> Vec<TemplateStatistics> {
        let Some(configuration) = self.configuration.as_ref() else {
            return Vec::new();
        };
        configuration
            .settings
            .node_templates
            .iter()
            .map(|template| {
                let nodes: Vec<&NodeDescription> = self
                    .by_template
                    .get(&template.code)
                    .into_iter()
                    .flatten()
                    .filter_map(|a| self.nodes.get(a))
                    .collect();
                TemplateStatistics {
                    code: template.code.clone(),
                    minimum_required: template.minimum_required_instances,
                    maximum_needed: template.maximum_needed_instances,
                    active: nodes.len(),
                    obsolete: nodes.iter().filter(|n| n.is_obsolete).count(),
                    upgrading: self
                        .upgrading
                        .values()
                        .filter(|u| u.template_code == template.code)
                        .count(),
                    starting: self
                        .awaiting
                        .iter()
                        .filter(|a| a.template_code == template.code)
                        .count(),
                }
            })
            .collect()
    }

    // Resources and migrations

    fn refresh_gates(&mut self) {
        let inputs = GateInputs {
            configuration_id: self.configuration.as_ref().map(|c| c.id),
            migration: self.migration.as_ref(),
            any_obsolete_node: self.nodes.values().any(|n| n.is_obsolete),
        };
        self.resource_state.refresh(inputs);
    }

    async fn recheck(&self) {
        if let Err(e) = self.orchestrator.recheck_state().await {
            tracing::error!(error = %e, "migration orchestrator is unavailable");
        }
    }

    async fn persist(&self, records: Vec<MigrationLogRecord>) {
        if records.is_empty() {
            return;
        }
        if let Err(e) = self.store.append_log_records(records).await {
            tracing::error!(error = %e, "failed to store migration log");
        }
    }

    async fn on_orchestrator_notification(
        &mut self,
        notification: OrchestratorNotification,
    ) -> Result<(), CoordinatorError> {
        match notification {
            OrchestratorNotification::ProcessingTheRequest => {
                self.resource_state.operation_is_in_progress = true;
                self.resource_state.close_gates();
            }
            OrchestratorNotification::ConfigurationState(state) => {
                if let Some(migration) = &self.migration {
                    tracing::warn!(migration_id = %migration.id, "configuration state received during a migration");
                    return Ok(());
                }
                self.resource_state.operation_is_in_progress = false;
                self.resource_state.configuration_state = Some(state);
                self.resource_state.migration_state = None;
                self.refresh_gates();
            }
            OrchestratorNotification::MigrationState(state) => {
                self.on_migration_state(state).await?;
            }
            OrchestratorNotification::InitializationFailed(errors) => {
                for record in &errors {
                    tracing::error!(
                        template = ?record.migrator_template_code,
                        message = %record.message,
                        error = ?record.error,
                        "resource state initialization failed"
                    );
                }
                self.resource_state.operation_is_in_progress = false;
                self.resource_state.configuration_state = None;
                self.resource_state.migration_state = None;
                self.persist(errors).await;
                self.refresh_gates();
            }
            OrchestratorNotification::Logs(records) => {
                for record in records.iter().filter(|r| r.is_error()) {
                    tracing::error!(
                        resource = ?record.resource_code,
                        message = %record.message,
                        error = ?record.error,
                        "resource operation failed"
                    );
                }
                self.persist(records).await;
            }
        }
        Ok(())
    }

    async fn on_migration_state(
        &mut self,
        state: MigrationResourceState,
    ) -> Result<(), CoordinatorError> {
        let Some(migration) = self.migration.as_ref() else {
            tracing::error!(migration_id = %state.migration_id, "migration state received without an active migration");
            return Ok(());
        };
        if migration.id != state.migration_id {
            tracing::error!(
                expected = %migration.id,
                received = %state.migration_id,
                "migration state belongs to another migration"
            );
            return Ok(());
        }

        if migration.state == MigrationState::Preparing {
            match overall_direction(&state) {
                Some(direction) => self.mark_ready(direction).await?,
                None => tracing::error!(
                    migration_id = %state.migration_id,
                    "resources migrate in conflicting directions"
                ),
            }
        }

        self.resource_state.operation_is_in_progress = false;
        self.resource_state.migration_state = Some(state);
        self.resource_state.configuration_state = None;
        self.refresh_gates();
        Ok(())
    }

    async fn mark_ready(&mut self, direction: MigrationDirection) -> Result<(), CoordinatorError> {
        let current = self
            .migration
            .as_ref()
            .map(|m| m.id)
            .ok_or(CoordinatorError::DatabaseDesync)?;
        let mut stored = match self.store.active_migration().await? {
            Some(migration) if migration.id == current => migration,
            _ => return Err(CoordinatorError::DatabaseDesync),
        };

        stored.state = MigrationState::Ready;
        stored.direction = Some(direction);
        self.store.update_migration(&stored).await?;
        tracing::info!(migration_id = %stored.id, ?direction, "migration is ready");
        self.migration = Some(stored);
        Ok(())
    }

    async fn on_update_cluster(
        &mut self,
        configuration_id: ConfigurationId,
    ) -> Result<Migration, UpdateClusterError> {
        let state = &self.resource_state;
        if state.operation_is_in_progress {
            return Err(UpdateClusterError::ResourcesChecking);
        }
        if state.configuration_state.is_none() && state.migration_state.is_none() {
            return Err(UpdateClusterError::ResourceStateUnknown);
        }
        let current = match self.configuration.as_ref() {
            Some(configuration) if state.can_create_migration => configuration.id,
            _ => return Err(UpdateClusterError::CannotCreateMigration),
        };
        if self.migration.is_some() || self.store.active_migration().await?.is_some() {
            return Err(UpdateClusterError::MigrationPending);
        }
        if current == configuration_id {
            return Err(UpdateClusterError::AlreadySet);
        }
        let target = self
            .store
            .configuration(configuration_id)
            .await?
            .ok_or(UpdateClusterError::ConfigurationNotFound)?;
        if target.state == ConfigurationState::Draft {
            return Err(UpdateClusterError::DraftConfiguration);
        }

        let migration = self
            .store
            .insert_migration(Migration::start(current, configuration_id))
            .await?;
        tracing::info!(
            migration_id = %migration.id,
            from = %current,
            to = %configuration_id,
            "migration created"
        );

        self.migration = Some(migration.clone());
        self.resource_state.start_operation();
        self.recheck().await;
        Ok(migration)
    }

    async fn close_migration(&mut self, state: MigrationState) -> Result<bool, CoordinatorError> {
        let allowed = match state {
            MigrationState::Failed => self.resource_state.can_cancel_migration,
            _ => self.resource_state.can_finish_migration,
        };
        if !allowed {
            tracing::warn!(?state, "migration cannot be closed at this time");
            return Ok(false);
        }

        let current = self
            .migration
            .as_ref()
            .map(|m| m.id)
            .ok_or(CoordinatorError::DatabaseDesync)?;
        let mut stored = match self.store.migration(current).await? {
            Some(migration) if migration.is_active => migration,
            _ => return Err(CoordinatorError::DatabaseDesync),
        };

        stored.close(state);
        self.store.update_migration(&stored).await?;
        tracing::info!(migration_id = %stored.id, ?state, "migration closed");

        self.migration = None;
        self.configuration = self.store.active_configuration().await?;
        self.refresh_obsolescence();
        self.resource_state.start_operation();
        self.recheck().await;
        Ok(true)
    }

    async fn stored_configuration(
        &self,
        id: ConfigurationId,
    ) -> Result<Configuration, CoordinatorError> {
        self.store
            .configuration(id)
            .await?
            .ok_or(CoordinatorError::DatabaseDesync)
    }

    async fn on_update_nodes(&mut self, target: Side) -> Result<bool, CoordinatorError> {
        let allowed = match target {
            Side::Source => self.resource_state.can_update_nodes_to_source,
            Side::Destination => self.resource_state.can_update_nodes_to_destination,
        };
        if !allowed {
            tracing::warn!(?target, "nodes cannot be updated at this time");
            return Ok(false);
        }

        let migration = self
            .migration
            .clone()
            .ok_or(CoordinatorError::DatabaseDesync)?;
        let downgrade = migration.direction == Some(MigrationDirection::Downgrade);
        let mut source = self
            .stored_configuration(migration.from_configuration_id)
            .await?;
        let mut destination = self
            .stored_configuration(migration.to_configuration_id)
            .await?;

        let (active, retired) = match target {
            Side::Destination => {
                source.state = if downgrade {
                    ConfigurationState::Faulted
                } else {
                    ConfigurationState::Obsolete
                };
                destination.state = ConfigurationState::Active;
                (destination, source)
            }
            Side::Source => {
                destination.state = if downgrade {
                    ConfigurationState::Obsolete
                } else {
                    ConfigurationState::Faulted
                };
                source.state = ConfigurationState::Active;
                (source, destination)
            }
        };
        self.store.update_configuration(&retired).await?;
        self.store.update_configuration(&active).await?;
        tracing::info!(
            migration_id = %migration.id,
            ?target,
            active = %active.id,
            retired = %retired.id,
            "cluster nodes switched configuration"
        );

        self.configuration = Some(active);
        self.refresh_obsolescence();
        self.sweep();
        self.refresh_gates();
        Ok(true)
    }

    async fn on_upgrade_resources(
        &mut self,
        requests: Vec<ResourceUpgrade>,
    ) -> Result<bool, CoordinatorError> {
        if !self.resource_state.can_migrate_resources || requests.is_empty() {
            tracing::warn!(requests = requests.len(), "resources cannot be migrated at this time");
            return Ok(false);
        }

        match self.orchestrator.upgrade_resources(requests).await {
            Ok(UpgradeReply::Acknowledged) => {
                self.resource_state.operation_is_in_progress = true;
                self.resource_state.close_gates();
                if self.migration.is_some() {
                    self.resource_state.current_migration_step = Some(MigrationStep::ResourcesUpdating);
                }
                Ok(true)
            }
            Ok(UpgradeReply::Declined(errors)) => {
                tracing::warn!(errors = errors.len(), "resource upgrade declined");
                self.persist(errors).await;
                Ok(false)
            }
            Err(OrchestratorError::NoReply) => {
                tracing::warn!("resource upgrade was not accepted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
