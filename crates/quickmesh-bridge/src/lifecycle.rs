//! Root lifecycle state machine
//!
//! Mesh, uplink and broker notifications arrive as [`LifecycleEvent`]s. The
//! machine turns each one into an ordered list of [`LifecycleAction`]s for the
//! runtime to execute. It holds no handles and performs no I/O, so every
//! transition is testable on its own.
//!
//! # Bring-up on the root
//!
//! ```text
//! ParentConnected ──► AcquireAddress
//! RootGotIp       ──► StartBroker, StartWorkers
//! BrokerConnected ──► SubscribeCommands, PushTopology, SetReady(true)
//! ```
//!
//! Readiness is set only by `BrokerConnected` on the root and cleared by
//! `BrokerDisconnected`, parent loss and mesh stop.

use quickmesh_core::MeshAddr;
use std::net::IpAddr;

use crate::interface::MeshRole;

/// Routing table change direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// Nodes joined below this node
    Added,
    /// Nodes left
    Removed,
}

/// Notifications that drive the lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Mesh stack is up
    MeshStarted,
    /// Mesh stack stopped
    MeshStopped,
    /// Link to a parent node (or, for the root, the upstream router) established
    ParentConnected,
    /// Parent link lost
    ParentDisconnected,
    /// Routing table changed
    MembershipChanged {
        /// Whether nodes were added or removed
        change: MembershipChange,
        /// Nodes affected
        nodes: Vec<MeshAddr>,
    },
    /// The root's uplink acquired an IP address
    RootGotIp {
        /// Address that was assigned
        address: IpAddr,
    },
    /// Broker session established
    BrokerConnected,
    /// Broker session lost
    BrokerDisconnected,
}

impl LifecycleEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::MeshStarted => "mesh_started",
            LifecycleEvent::MeshStopped => "mesh_stopped",
            LifecycleEvent::ParentConnected => "parent_connected",
            LifecycleEvent::ParentDisconnected => "parent_disconnected",
            LifecycleEvent::MembershipChanged { .. } => "membership_changed",
            LifecycleEvent::RootGotIp { .. } => "root_got_ip",
            LifecycleEvent::BrokerConnected => "broker_connected",
            LifecycleEvent::BrokerDisconnected => "broker_disconnected",
        }
    }
}

/// Side effects requested by the machine, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Ask the uplink for an IP address
    AcquireAddress,
    /// Start the broker session
    StartBroker,
    /// Tear the broker session down
    StopBroker,
    /// Spawn the inbound and outbound bridge workers
    StartWorkers,
    /// Subscribe to the downstream command filter
    SubscribeCommands,
    /// Push the current routing table to the broker
    PushTopology,
    /// Write the readiness flag
    SetReady(bool),
}

/// What the machine knows about the node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleState {
    /// Mesh stack running
    pub mesh_started: bool,
    /// Parent link up
    pub parent_connected: bool,
    /// Address held by the root's uplink
    pub root_address: Option<IpAddr>,
    /// Broker session established
    pub broker_connected: bool,
    /// Readiness as last requested
    pub ready: bool,
}

/// Event-to-action state machine
#[derive(Debug, Clone, Default)]
pub struct LifecycleMachine {
    state: LifecycleState,
}

impl LifecycleMachine {
    /// Create a machine with everything down
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Apply an event given the node's current role
    pub fn handle(&mut self, event: &LifecycleEvent, role: MeshRole) -> Vec<LifecycleAction> {
        use LifecycleAction::*;

        match event {
            LifecycleEvent::MeshStarted => {
                self.state.mesh_started = true;
                Vec::new()
            }

            LifecycleEvent::MeshStopped => {
                self.state.mesh_started = false;
                self.state.parent_connected = false;
                self.state.root_address = None;
                self.teardown()
            }

            LifecycleEvent::ParentConnected => {
                self.state.parent_connected = true;
                if role.is_root() {
                    vec![AcquireAddress]
                } else {
                    Vec::new()
                }
            }

            LifecycleEvent::ParentDisconnected => {
                self.state.parent_connected = false;
                if role.is_root() {
                    self.state.root_address = None;
                    if self.state.broker_connected {
                        return self.teardown();
                    }
                }
                Vec::new()
            }

            LifecycleEvent::MembershipChanged { .. } => {
                if role.is_root() && self.state.ready {
                    vec![PushTopology]
                } else {
                    Vec::new()
                }
            }

            LifecycleEvent::RootGotIp { address } => {
                if !role.is_root() {
                    return Vec::new();
                }
                self.state.root_address = Some(*address);
                vec![StartBroker, StartWorkers]
            }

            LifecycleEvent::BrokerConnected => {
                if role.is_root() {
                    self.state.broker_connected = true;
                    self.state.ready = true;
                    vec![SubscribeCommands, PushTopology, SetReady(true)]
                } else {
                    // Stale session from a previous root term
                    self.state.broker_connected = false;
                    vec![StopBroker]
                }
            }

            LifecycleEvent::BrokerDisconnected => {
                self.state.broker_connected = false;
                self.state.ready = false;
                vec![SetReady(false)]
            }
        }
    }

    // Readiness is cleared before the session goes away so no worker
    // publishes into a dying session.
    fn teardown(&mut self) -> Vec<LifecycleAction> {
        let had_session = self.state.broker_connected;
        self.state.broker_connected = false;
        self.state.ready = false;

        let mut actions = vec![LifecycleAction::SetReady(false)];
        if had_session {
            actions.push(LifecycleAction::StopBroker);
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleAction::*;

    fn ip() -> IpAddr {
        "192.168.1.20".parse().unwrap()
    }

    fn bring_up(machine: &mut LifecycleMachine) {
        machine.handle(&LifecycleEvent::MeshStarted, MeshRole::Root);
        machine.handle(&LifecycleEvent::ParentConnected, MeshRole::Root);
        machine.handle(&LifecycleEvent::RootGotIp { address: ip() }, MeshRole::Root);
        machine.handle(&LifecycleEvent::BrokerConnected, MeshRole::Root);
    }

    #[test]
    fn test_root_bring_up_sequence() {
        let mut machine = LifecycleMachine::new();

        assert!(machine
            .handle(&LifecycleEvent::MeshStarted, MeshRole::Root)
            .is_empty());
        assert_eq!(
            machine.handle(&LifecycleEvent::ParentConnected, MeshRole::Root),
            vec![AcquireAddress]
        );
        assert_eq!(
            machine.handle(&LifecycleEvent::RootGotIp { address: ip() }, MeshRole::Root),
            vec![StartBroker, StartWorkers]
        );
        assert!(!machine.state().ready);
        assert_eq!(
            machine.handle(&LifecycleEvent::BrokerConnected, MeshRole::Root),
            vec![SubscribeCommands, PushTopology, SetReady(true)]
        );
        assert!(machine.state().ready);
        assert_eq!(machine.state().root_address, Some(ip()));
    }

    #[test]
    fn test_non_root_never_bridges() {
        let mut machine = LifecycleMachine::new();
        assert!(machine
            .handle(&LifecycleEvent::ParentConnected, MeshRole::Node)
            .is_empty());
        assert!(machine
            .handle(&LifecycleEvent::RootGotIp { address: ip() }, MeshRole::Node)
            .is_empty());
        assert_eq!(
            machine.handle(&LifecycleEvent::BrokerConnected, MeshRole::Node),
            vec![StopBroker]
        );
        assert!(!machine.state().ready);
    }

    #[test]
    fn test_parent_loss_clears_ready_before_stop() {
        let mut machine = LifecycleMachine::new();
        bring_up(&mut machine);

        assert_eq!(
            machine.handle(&LifecycleEvent::ParentDisconnected, MeshRole::Root),
            vec![SetReady(false), StopBroker]
        );
        assert!(!machine.state().ready);
        assert!(!machine.state().broker_connected);
        assert_eq!(machine.state().root_address, None);
    }

    #[test]
    fn test_parent_loss_without_session_is_quiet() {
        let mut machine = LifecycleMachine::new();
        machine.handle(&LifecycleEvent::ParentConnected, MeshRole::Root);
        assert!(machine
            .handle(&LifecycleEvent::ParentDisconnected, MeshRole::Root)
            .is_empty());
        assert!(machine
            .handle(&LifecycleEvent::ParentDisconnected, MeshRole::Node)
            .is_empty());
    }

    #[test]
    fn test_membership_pushes_only_when_ready() {
        let mut machine = LifecycleMachine::new();
        let change = LifecycleEvent::MembershipChanged {
            change: MembershipChange::Added,
            nodes: vec![MeshAddr::new([1, 2, 3, 4, 5, 6])],
        };

        assert!(machine.handle(&change, MeshRole::Root).is_empty());

        bring_up(&mut machine);
        assert_eq!(machine.handle(&change, MeshRole::Root), vec![PushTopology]);
        assert!(machine.handle(&change, MeshRole::Node).is_empty());
    }

    #[test]
    fn test_broker_disconnect_clears_ready() {
        let mut machine = LifecycleMachine::new();
        bring_up(&mut machine);

        assert_eq!(
            machine.handle(&LifecycleEvent::BrokerDisconnected, MeshRole::Root),
            vec![SetReady(false)]
        );
        assert!(!machine.state().ready);

        // Reconnect restores readiness without another address
        assert_eq!(
            machine.handle(&LifecycleEvent::BrokerConnected, MeshRole::Root),
            vec![SubscribeCommands, PushTopology, SetReady(true)]
        );
    }

    #[test]
    fn test_mesh_stop_tears_down() {
        let mut machine = LifecycleMachine::new();
        bring_up(&mut machine);

        assert_eq!(
            machine.handle(&LifecycleEvent::MeshStopped, MeshRole::Root),
            vec![SetReady(false), StopBroker]
        );
        assert_eq!(machine.state(), &LifecycleState::default());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(LifecycleEvent::BrokerConnected.name(), "broker_connected");
        assert_eq!(
            LifecycleEvent::RootGotIp { address: ip() }.name(),
            "root_got_ip"
        );
    }
}
