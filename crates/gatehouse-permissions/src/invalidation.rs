//! Cache invalidation signal.
//!
//! Each process keeps its own compiled-policy cache. When one instance
//! mutates a policy it invalidates its local cache directly and publishes an
//! [`InvalidationEvent`] so other instances sharing the notifier can drop
//! their stale entries.
//!
//! - [`PolicyChangeNotifier`] - broadcast channel for invalidation messages
//! - [`CacheInvalidationListener`] - task that applies messages from other
//!   origins to a local [`PolicyCache`]
//!
//! # Example
//!
//! ```ignore
//! let notifier = Arc::new(PolicyChangeNotifier::new(64));
//! let listener = Arc::new(CacheInvalidationListener::new(cache, notifier.clone(), origin));
//!
//! tokio::spawn({
//!     let listener = listener.clone();
//!     async move { listener.run().await }
//! });
//!
//! notifier.notify(other_origin, InvalidationEvent::App { app_id: "app-1".into() });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use crate::cache::PolicyCache;
use crate::model::TenantScope;

// =============================================================================
// Invalidation Events
// =============================================================================

/// What to drop from a compiled-policy cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// One policy changed or was deleted.
    Policy { policy_id: Uuid },

    /// The policy set of one resource type changed.
    ResourceType {
        scope: TenantScope,
        resource_type: String,
    },

    /// Everything under an application.
    App { app_id: String },

    /// Everything under an environment, organizations included.
    Environment {
        app_id: String,
        environment_id: String,
    },

    /// Everything under one organization.
    Organization {
        app_id: String,
        environment_id: String,
        organization_id: String,
    },

    /// The whole cache.
    All,
}

impl InvalidationEvent {
    /// Apply the event to a local cache.
    pub async fn apply(&self, cache: &PolicyCache) {
        match self {
            Self::Policy { policy_id } => {
                cache.invalidate_by_policy(*policy_id).await;
            }
            Self::ResourceType {
                scope,
                resource_type,
            } => {
                cache.invalidate_resource_type(scope, resource_type).await;
            }
            Self::App { app_id } => {
                cache.invalidate_by_app(app_id).await;
            }
            Self::Environment {
                app_id,
                environment_id,
            } => {
                cache.invalidate_by_environment(app_id, environment_id).await;
            }
            Self::Organization {
                app_id,
                environment_id,
                organization_id,
            } => {
                cache
                    .invalidate_by_organization(app_id, environment_id, organization_id)
                    .await;
            }
            Self::All => cache.clear().await,
        }
    }
}

/// An event plus the identity of the instance that published it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    pub origin: Uuid,
    pub event: InvalidationEvent,
}

// =============================================================================
// Policy Change Notifier
// =============================================================================

/// Broadcast channel for invalidation messages.
///
/// Multiple producers can send notifications, and multiple consumers can
/// subscribe to receive them.
pub struct PolicyChangeNotifier {
    sender: broadcast::Sender<InvalidationMessage>,
}

impl PolicyChangeNotifier {
    /// Create a new notifier.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of pending messages in the channel
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event.
    ///
    /// If there are no subscribers, the message is silently dropped.
    pub fn notify(&self, origin: Uuid, event: InvalidationEvent) {
        tracing::debug!(origin = %origin, event = ?event, "Publishing cache invalidation");
        // Ignore send errors (no receivers)
        let _ = self.sender.send(InvalidationMessage { origin, event });
    }

    /// Subscribe to future messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PolicyChangeNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

// =============================================================================
// Listener Statistics
// =============================================================================

/// Statistics about the invalidation listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Messages taken off the channel and handled.
    pub messages_received: u64,
    /// Messages applied to the local cache.
    pub messages_applied: u64,
    /// Messages ignored because this instance published them.
    pub messages_ignored: u64,
    /// Messages lost because the listener fell behind.
    pub messages_lagged: u64,
}

// =============================================================================
// Cache Invalidation Listener
// =============================================================================

/// Applies invalidation messages from other instances to a local cache.
///
/// Falling behind the channel drops the whole local cache, since the missed
/// messages cannot be recovered.
pub struct CacheInvalidationListener {
    cache: Arc<PolicyCache>,
    notifier: Arc<PolicyChangeNotifier>,
    origin: Uuid,

    shutdown: AtomicBool,
    shutdown_signal: Notify,

    messages_received: AtomicU64,
    messages_applied: AtomicU64,
    messages_ignored: AtomicU64,
    messages_lagged: AtomicU64,
}

impl CacheInvalidationListener {
    /// Create a listener for `cache`, ignoring messages from `origin`.
    #[must_use]
    pub fn new(
        cache: Arc<PolicyCache>,
        notifier: Arc<PolicyChangeNotifier>,
        origin: Uuid,
    ) -> Self {
        Self {
            cache,
            notifier,
            origin,
            shutdown: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
            messages_received: AtomicU64::new(0),
            messages_applied: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            messages_lagged: AtomicU64::new(0),
        }
    }

    /// Run until [`CacheInvalidationListener::shutdown`] is called or the
    /// channel closes.
    pub async fn run(&self) {
        let mut receiver = self.notifier.subscribe();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::info!("Cache invalidation listener shutting down");
                break;
            }

            tokio::select! {
                result = receiver.recv() => {
                    match result {
                        Ok(message) => self.handle(message).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "Missed cache invalidation messages, clearing cache");
                            self.messages_lagged.fetch_add(n, Ordering::Relaxed);
                            self.cache.clear().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Cache invalidation channel closed");
                            break;
                        }
                    }
                }
                () = self.shutdown_signal.notified() => {}
            }
        }
    }

    async fn handle(&self, message: InvalidationMessage) {
        if message.origin == self.origin {
            self.messages_ignored.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!(origin = %message.origin, event = ?message.event, "Applying cache invalidation");
            message.event.apply(&self.cache).await;
            self.messages_applied.fetch_add(1, Ordering::Relaxed);
        }
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Signal the listener to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_signal.notify_one();
    }

    /// Check if the listener is shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Get listener statistics.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_applied: self.messages_applied.load(Ordering::Relaxed),
            messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
            messages_lagged: self.messages_lagged.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
