//! In-memory audit log.

use async_trait::async_trait;
use gatehouse_permissions::{AuditEvent, AuditFilter, AuditLog, PermissionsResult, TenantScope};
use tokio::sync::RwLock;

/// Append-only [`AuditLog`] kept in process memory.
///
/// With a capacity set, the oldest events are dropped once the log is full.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
    capacity: Option<usize>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, event: AuditEvent) -> PermissionsResult<()> {
        let mut events = self.events.write().await;
        events.push(event);
        if let Some(capacity) = self.capacity
            && events.len() > capacity
        {
            let excess = events.len() - capacity;
            events.drain(..excess);
        }
        Ok(())
    }

    async fn query(
        &self,
        scope: &TenantScope,
        filter: &AuditFilter,
    ) -> PermissionsResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        let matching = events
            .iter()
            .rev()
            .filter(|e| e.scope == *scope && filter.matches(e))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_permissions::{AuditAction, AuditEventBuilder};

    fn event(scope: &TenantScope, action: AuditAction, id: &str) -> AuditEvent {
        AuditEventBuilder::new(scope, "alice", action, id).build()
    }

    #[tokio::test]
    async fn test_query_is_scoped_and_recent_first() {
        let log = InMemoryAuditLog::new();
        let prod = TenantScope::new("app", "prod");
        let dev = TenantScope::new("app", "dev");

        log.append(event(&prod, AuditAction::PolicyCreate, "1")).await.unwrap();
        log.append(event(&dev, AuditAction::PolicyCreate, "2")).await.unwrap();
        log.append(event(&prod, AuditAction::PolicyDelete, "1")).await.unwrap();

        let events = log.query(&prod, &AuditFilter::new()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::PolicyDelete);

        let filtered = log
            .query(
                &prod,
                &AuditFilter::new().with_action(AuditAction::PolicyCreate),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let log = InMemoryAuditLog::with_capacity(2);
        let scope = TenantScope::new("app", "prod");
        for id in ["1", "2", "3"] {
            log.append(event(&scope, AuditAction::PolicyCreate, id)).await.unwrap();
        }

        assert_eq!(log.len().await, 2);
        let events = log.query(&scope, &AuditFilter::new()).await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }
}
