//! Batched push of an administrative directive to every live connection.
//!
//! The ids of live connections are snapshotted once, split into batches,
//! and sent `c <command>` one by one: `delay` after each connection,
//! `batch_delay` after each batch. Each id is looked up again right before
//! its send, so connections opened after the snapshot are not reached and
//! connections closed since are skipped.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ConnectionId, ConnectionRegistry};
use crate::error::GatewayError;

/// Parameters of one directive push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectivePlan {
    /// Directive sent as `c <command>`.
    pub command: String,
    /// Connections per batch.
    pub batch_size: usize,
    /// Pause after each batch.
    pub batch_delay: Duration,
    /// Pause after each connection.
    pub delay: Duration,
}

impl DirectivePlan {
    /// Validates and builds a plan.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] if `batch_size` is zero or
    /// `command` is empty or spans several lines.
    pub fn new(
        command: impl Into<String>,
        batch_size: usize,
        batch_delay: Duration,
        delay: Duration,
    ) -> Result<Self, GatewayError> {
        let command = command.into();
        if batch_size == 0 {
            return Err(GatewayError::InvalidRequest(
                "batch_size must be positive".to_string(),
            ));
        }
        if command.trim().is_empty() || command.contains(['\n', '\r']) {
            return Err(GatewayError::InvalidRequest(
                "command must be a single non-empty line".to_string(),
            ));
        }
        Ok(Self {
            command,
            batch_size,
            batch_delay,
            delay,
        })
    }
}

/// A directive push over a fixed snapshot of connections.
#[derive(Debug)]
pub struct DirectiveBroadcast {
    plan: DirectivePlan,
    registry: Arc<ConnectionRegistry>,
    batches: Vec<Vec<ConnectionId>>,
}

impl DirectiveBroadcast {
    /// Snapshots the registry and splits it into batches.
    #[must_use]
    pub fn prepare(registry: &Arc<ConnectionRegistry>, plan: DirectivePlan) -> Self {
        let ids: Vec<ConnectionId> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        let batches = ids.chunks(plan.batch_size).map(<[_]>::to_vec).collect();
        Self {
            plan,
            registry: Arc::clone(registry),
            batches,
        }
    }

    /// Number of connections in the snapshot.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Number of batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Sends the directive. Returns how many connections were reached.
    pub async fn run(self) -> usize {
        let mut reached = 0;
        for batch in &self.batches {
            for id in batch {
                let sent = self
                    .registry
                    .get(*id)
                    .is_some_and(|handle| handle.send_directive(&self.plan.command));
                if sent {
                    reached += 1;
                } else {
                    tracing::debug!(connection_id = %id, "connection closed before directive");
                }
                pause(self.plan.delay).await;
            }
            pause(self.plan.batch_delay).await;
        }
        tracing::info!(
            command = %self.plan.command,
            reached,
            batches = self.batches.len(),
            "directive push finished"
        );
        reached
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionEvent, ConnectionHandle, ConnectionKey};

    fn plan(batch_size: usize) -> DirectivePlan {
        let Ok(plan) = DirectivePlan::new("refresh", batch_size, Duration::ZERO, Duration::ZERO)
        else {
            panic!("valid plan rejected");
        };
        plan
    }

    #[test]
    fn rejects_invalid_plans() {
        assert!(matches!(
            DirectivePlan::new("refresh", 0, Duration::ZERO, Duration::ZERO),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            DirectivePlan::new("a\nb", 1, Duration::ZERO, Duration::ZERO),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn pushes_to_every_live_connection_in_batches() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut mailboxes = Vec::new();
        for raw in 1..=5 {
            let (handle, rx) = ConnectionHandle::new(ConnectionKey::next());
            assert!(registry.insert(ConnectionId::new(raw), handle));
            mailboxes.push(rx);
        }
        // One connection went away after registering.
        let closed = mailboxes.pop();
        drop(closed);

        let broadcast = DirectiveBroadcast::prepare(&registry, plan(2));
        assert_eq!(broadcast.connections(), 5);
        assert_eq!(broadcast.batch_count(), 3);

        // Another one is torn down between the snapshot and the push.
        assert!(registry.remove(ConnectionId::new(1)));
        drop(mailboxes.remove(0));
        assert_eq!(broadcast.run().await, 3);

        for rx in &mut mailboxes {
            let Ok(ConnectionEvent::Directive(command)) = rx.try_recv() else {
                panic!("directive not delivered");
            };
            assert_eq!(command, "refresh");
        }
    }

    #[tokio::test]
    async fn empty_registry_has_no_batches() {
        let broadcast = DirectiveBroadcast::prepare(&Arc::new(ConnectionRegistry::new()), plan(10));
        assert_eq!(broadcast.batch_count(), 0);
        assert_eq!(broadcast.run().await, 0);
    }
}
