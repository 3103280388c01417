//! Bridge task: drives a [`MetadataBridge`] from its mailbox, its control
//! channel, the id allocation and the keep-alive timer, and publishes what
//! it emits.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::state::MetadataBridge;
use crate::adapters::{BridgeTransport, IdAllocator};
use crate::domain::{ConnectionId, Identity};
use crate::error::GatewayError;

/// Idle period used for the timer when self keep-alive is off; the branch is
/// disabled in that case, the deadline only needs to exist.
const PARKED: Duration = Duration::from_secs(86_400);

/// Lifecycle operation posted to the bridge task.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    /// See [`MetadataBridge::connection_created`].
    ConnectionCreated(ConnectionId),
    /// See [`MetadataBridge::add_field`].
    AddField {
        /// Target connection.
        id: ConnectionId,
        /// Field name.
        key: String,
        /// Field value, `None` for unknown.
        value: Option<Value>,
    },
    /// See [`MetadataBridge::identification_resolved`].
    IdentificationResolved {
        /// Target connection.
        id: ConnectionId,
        /// Resolved identity.
        identity: Identity,
    },
    /// See [`MetadataBridge::subscribed`].
    Subscribed {
        /// Target connection.
        id: ConnectionId,
        /// Identity at grant time.
        identity: Identity,
        /// Granted channel.
        channel: String,
    },
    /// See [`MetadataBridge::destroyed`].
    Destroyed {
        /// Target connection.
        id: ConnectionId,
        /// Identity at teardown.
        identity: Identity,
    },
}

/// Cloneable handle to the bridge task.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    instance_id: Arc<OnceLock<u64>>,
}

impl BridgeHandle {
    /// Records a new connection.
    pub fn connection_created(&self, id: ConnectionId) {
        self.send(BridgeCommand::ConnectionCreated(id));
    }

    /// Records an attribute of a connection.
    pub fn add_field(&self, id: ConnectionId, key: &str, value: Option<Value>) {
        self.send(BridgeCommand::AddField {
            id,
            key: key.to_string(),
            value,
        });
    }

    /// Records the resolved identity of a connection.
    pub fn identification_resolved(&self, id: ConnectionId, identity: Identity) {
        self.send(BridgeCommand::IdentificationResolved { id, identity });
    }

    /// Records a granted subscription.
    pub fn subscribed(&self, id: ConnectionId, identity: Identity, channel: &str) {
        self.send(BridgeCommand::Subscribed {
            id,
            identity,
            channel: channel.to_string(),
        });
    }

    /// Records the end of a connection.
    pub fn destroyed(&self, id: ConnectionId, identity: Identity) {
        self.send(BridgeCommand::Destroyed { id, identity });
    }

    /// Instance id of the bridge, once allocated.
    #[must_use]
    pub fn instance_id(&self) -> Option<u64> {
        self.instance_id.get().copied()
    }

    fn send(&self, command: BridgeCommand) {
        if self.commands.send(command).is_err() {
            tracing::error!("metadata bridge task is gone, dropping event");
        }
    }
}

/// Starts the bridge task.
///
/// `control` carries raw payloads received on the inbound control channel.
/// The task stops once every [`BridgeHandle`] is dropped.
pub fn spawn_bridge(
    keep_alive: Option<Duration>,
    allocator: Arc<dyn IdAllocator>,
    transport: Arc<dyn BridgeTransport>,
    control: mpsc::UnboundedReceiver<String>,
) -> (BridgeHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::unbounded_channel();
    let instance_id = Arc::new(OnceLock::new());
    let handle = BridgeHandle {
        commands,
        instance_id: Arc::clone(&instance_id),
    };

    let (id_tx, id_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = id_tx.send(allocator.allocate().await);
    });

    let task = tokio::spawn(run_bridge(
        MetadataBridge::new(keep_alive),
        keep_alive,
        rx,
        control,
        id_rx,
        transport,
        instance_id,
    ));
    (handle, task)
}

async fn run_bridge(
    mut bridge: MetadataBridge,
    keep_alive: Option<Duration>,
    mut commands: mpsc::UnboundedReceiver<BridgeCommand>,
    mut control: mpsc::UnboundedReceiver<String>,
    mut id_rx: oneshot::Receiver<Result<u64, GatewayError>>,
    transport: Arc<dyn BridgeTransport>,
    instance_id: Arc<OnceLock<u64>>,
) {
    let period = keep_alive.unwrap_or(PARKED);
    let timer = tokio::time::sleep(period);
    tokio::pin!(timer);
    let mut awaiting_id = true;
    let mut control_open = true;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                apply(&mut bridge, command);
            }
            raw = control.recv(), if control_open => match raw {
                Some(raw) => bridge.handle_control(&raw),
                None => {
                    tracing::warn!("bridge control channel closed");
                    control_open = false;
                }
            },
            allocated = &mut id_rx, if awaiting_id => {
                awaiting_id = false;
                match allocated {
                    Ok(Ok(id)) => {
                        let _ = instance_id.set(id);
                        bridge.assign_id(id);
                    }
                    Ok(Err(err)) => {
                        tracing::error!(critical = true, error = %err, "bridge id allocation failed, emissions stay buffered");
                    }
                    Err(_) => tracing::error!("bridge id allocation task vanished"),
                }
            }
            () = &mut timer, if keep_alive.is_some() => bridge.keep_alive(),
        }

        if bridge.take_activity() {
            timer.as_mut().reset(Instant::now() + period);
        }
        for payload in bridge.drain_outbox() {
            if let Err(err) = transport.publish(payload).await {
                tracing::error!(error = %err, "failed to publish bridge message");
            }
        }
    }
    tracing::debug!("metadata bridge stopped");
}

fn apply(bridge: &mut MetadataBridge, command: BridgeCommand) {
    match command {
        BridgeCommand::ConnectionCreated(id) => bridge.connection_created(id),
        BridgeCommand::AddField { id, key, value } => bridge.add_field(id, &key, value),
        BridgeCommand::IdentificationResolved { id, identity } => {
            bridge.identification_resolved(id, identity);
        }
        BridgeCommand::Subscribed {
            id,
            identity,
            channel,
        } => bridge.subscribed(id, identity, &channel),
        BridgeCommand::Destroyed { id, identity } => bridge.destroyed(id, identity),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryBridgeTransport, SequentialIdAllocator};

    fn types(published: &[String]) -> Vec<String> {
        published
            .iter()
            .filter_map(|p| serde_json::from_str::<Value>(p).ok())
            .filter_map(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    async fn wait_for(transport: &MemoryBridgeTransport, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let published = transport.published();
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("only {} bridge messages published", transport.published().len());
    }

    #[tokio::test]
    async fn publishes_lifecycle_in_order_with_instance_id() {
        let transport = Arc::new(MemoryBridgeTransport::new());
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let (handle, _task) = spawn_bridge(
            None,
            Arc::new(SequentialIdAllocator::starting_at(40)),
            Arc::clone(&transport) as Arc<dyn BridgeTransport>,
            control_rx,
        );

        let id = ConnectionId::new(1);
        handle.connection_created(id);
        handle.identification_resolved(id, Identity::Guest);
        handle.subscribed(id, Identity::Guest, "news");
        handle.destroyed(id, Identity::Guest);

        let published = wait_for(&transport, 5).await;
        assert_eq!(
            types(&published),
            vec![
                "syncWithState",
                "userConnectionNewEvent",
                "userConnectionIdentificationEvent",
                "userConnectionSubscribe",
                "userConnectionDestroyEvent",
            ]
        );
        assert!(published.iter().all(|p| p.contains("\"id\":40")));
        assert_eq!(handle.instance_id(), Some(40));
    }

    #[tokio::test]
    async fn control_channel_triggers_keep_alive() {
        let transport = Arc::new(MemoryBridgeTransport::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (_handle, _task) = spawn_bridge(
            None,
            Arc::new(SequentialIdAllocator::default()),
            Arc::clone(&transport) as Arc<dyn BridgeTransport>,
            control_rx,
        );
        wait_for(&transport, 1).await;

        let _ = control_tx.send(r#"{"type":"checkAliveAll"}"#.to_string());
        let published = wait_for(&transport, 2).await;
        assert_eq!(types(&published), vec!["syncWithState", "keepAlive"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_bridge_emits_keep_alive() {
        let transport = Arc::new(MemoryBridgeTransport::new());
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let (_handle, _task) = spawn_bridge(
            Some(Duration::from_millis(50)),
            Arc::new(SequentialIdAllocator::default()),
            Arc::clone(&transport) as Arc<dyn BridgeTransport>,
            control_rx,
        );

        let published = wait_for(&transport, 2).await;
        assert_eq!(
            types(&published).get(..2),
            Some(&["syncWithState".to_string(), "keepAlive".to_string()][..])
        );
        assert!(published.get(1).is_some_and(|p| p.contains("\"timeout\":50")));
    }
}
