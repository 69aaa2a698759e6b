//! Compiled-policy cache.
//!
//! An in-process index from `(app, environment, organization, resource type,
//! action)` to the compiled policies applicable to that key. Keys are ordered
//! tuples in a `BTreeMap`, so invalidating a coarser scope is a range walk
//! over a contiguous block of keys and always removes every finer key nested
//! under it.
//!
//! The cache also remembers which `(scope, resource type)` sets have been
//! loaded. A lookup is only a hit when both the requested type and the `*`
//! type are loaded and fresh; otherwise the caller loads from the store and
//! repopulates through [`PolicyCache::load`]. The cache never touches the
//! store itself.
//!
//! Every write (put or invalidation) advances a generation. A loader takes a
//! [`LoadTicket`] before it reads the store, and `load` drops the set if a
//! write landed in between, so a slow read can never reinstate a predicate
//! that was replaced while it was in flight.
//!
//! # Example
//!
//! ```ignore
//! let cache = PolicyCache::new(&CacheConfig::default());
//!
//! match cache.lookup(&scope, "document", "read").await {
//!     Some(candidates) => evaluator.evaluate(candidates, &ctx).await,
//!     None => {
//!         let ticket = cache.ticket(&scope).await;
//!         /* read the store, compile */
//!         cache.load(&scope, "document", compiled, ticket).await;
//!     }
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::expression::CompiledPolicy;
use crate::model::{TenantScope, WILDCARD};

// =============================================================================
// Keys
// =============================================================================

/// Index key. Field order defines the ordering, so every key sharing an
/// app/environment/organization prefix is contiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct CacheKey {
    app: String,
    env: String,
    org: String,
    resource_type: String,
    action: String,
}

impl CacheKey {
    fn new(scope: &TenantScope, resource_type: &str, action: &str) -> Self {
        Self {
            app: scope.app_id.clone(),
            env: scope.environment_id.clone(),
            org: scope.organization_key().to_string(),
            resource_type: resource_type.to_string(),
            action: action.to_string(),
        }
    }

    fn type_key(&self) -> TypeKey {
        TypeKey {
            app: self.app.clone(),
            env: self.env.clone(),
            org: self.org.clone(),
            resource_type: self.resource_type.clone(),
        }
    }
}

/// A loaded `(scope, resource type)` set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct TypeKey {
    app: String,
    env: String,
    org: String,
    resource_type: String,
}

impl TypeKey {
    fn new(scope: &TenantScope, resource_type: &str) -> Self {
        Self {
            app: scope.app_id.clone(),
            env: scope.environment_id.clone(),
            org: scope.organization_key().to_string(),
            resource_type: resource_type.to_string(),
        }
    }

    /// First possible entry key for this set.
    fn first_entry(&self) -> CacheKey {
        CacheKey {
            app: self.app.clone(),
            env: self.env.clone(),
            org: self.org.clone(),
            resource_type: self.resource_type.clone(),
            action: String::new(),
        }
    }
}

/// A scope prefix used for bulk invalidation.
#[derive(Debug, Clone, Copy)]
struct Prefix<'a> {
    app: &'a str,
    env: Option<&'a str>,
    org: Option<&'a str>,
}

impl Prefix<'_> {
    fn contains(&self, app: &str, env: &str, org: &str) -> bool {
        app == self.app
            && self.env.is_none_or(|e| e == env)
            && self.org.is_none_or(|o| o == org)
    }

    // The empty string sorts first, so filling the unspecified components
    // with "" yields the smallest key under the prefix.
    fn lower_entry(&self) -> CacheKey {
        CacheKey {
            app: self.app.to_string(),
            env: self.env.unwrap_or_default().to_string(),
            org: self.org.unwrap_or_default().to_string(),
            resource_type: String::new(),
            action: String::new(),
        }
    }

    fn lower_type(&self) -> TypeKey {
        TypeKey {
            app: self.app.to_string(),
            env: self.env.unwrap_or_default().to_string(),
            org: self.org.unwrap_or_default().to_string(),
            resource_type: String::new(),
        }
    }
}

/// `(app, environment, organization)` of a scope, the unit of write
/// generations.
type ScopeKey = (String, String, String);

fn scope_key(scope: &TenantScope) -> ScopeKey {
    (
        scope.app_id.clone(),
        scope.environment_id.clone(),
        scope.organization_key().to_string(),
    )
}

/// Write generation observed before a store read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    /// Bumped by writes that may touch any scope.
    epoch: u64,
    /// Bumped by writes to this scope.
    scope: u64,
}

// =============================================================================
// Index
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct LoadedSet {
    loaded_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct CacheIndex {
    /// Compiled policies per key.
    entries: BTreeMap<CacheKey, Vec<Arc<CompiledPolicy>>>,

    /// Loaded `(scope, resource type)` sets.
    loaded: BTreeMap<TypeKey, LoadedSet>,

    /// Load counter; orders sets for eviction.
    next_seq: u64,

    /// Reverse index for point invalidation.
    by_policy: HashMap<Uuid, HashSet<CacheKey>>,

    /// Cache-wide write generation.
    epoch: u64,

    /// Per-scope write generations.
    generations: HashMap<ScopeKey, u64>,
}

impl CacheIndex {
    fn ticket(&self, scope: &ScopeKey) -> LoadTicket {
        LoadTicket {
            epoch: self.epoch,
            scope: self.generations.get(scope).copied().unwrap_or(0),
        }
    }

    fn bump_scope(&mut self, scope: ScopeKey) {
        *self.generations.entry(scope).or_insert(0) += 1;
    }

    fn insert(&mut self, policy: Arc<CompiledPolicy>) {
        self.remove_policy(policy.policy_id);
        let keys: Vec<CacheKey> = policy
            .actions
            .iter()
            .map(|action| CacheKey::new(&policy.scope, &policy.resource_type, action))
            .collect();
        for key in keys {
            self.by_policy
                .entry(policy.policy_id)
                .or_default()
                .insert(key.clone());
            self.entries.entry(key).or_default().push(Arc::clone(&policy));
        }
    }

    fn remove_policy(&mut self, policy_id: Uuid) -> bool {
        let Some(keys) = self.by_policy.remove(&policy_id) else {
            return false;
        };
        for key in keys {
            if let Some(list) = self.entries.get_mut(&key) {
                list.retain(|p| p.policy_id != policy_id);
                if list.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
        true
    }

    fn remove_entry_keys(&mut self, keys: Vec<CacheKey>) {
        for key in keys {
            if let Some(list) = self.entries.remove(&key) {
                for policy in list {
                    if let Some(set) = self.by_policy.get_mut(&policy.policy_id) {
                        set.remove(&key);
                        if set.is_empty() {
                            self.by_policy.remove(&policy.policy_id);
                        }
                    }
                }
            }
        }
    }

    /// Drop every entry of one loaded set, plus its presence marker.
    fn remove_type(&mut self, type_key: &TypeKey) {
        let keys: Vec<CacheKey> = self
            .entries
            .range((Bound::Included(type_key.first_entry()), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.type_key() == *type_key)
            .cloned()
            .collect();
        self.remove_entry_keys(keys);
        self.loaded.remove(type_key);
    }

    /// Drop everything under a scope prefix. Returns the number of keys removed.
    fn remove_prefix(&mut self, prefix: Prefix<'_>) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .range((Bound::Included(prefix.lower_entry()), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.app == prefix.app)
            .filter(|k| prefix.contains(&k.app, &k.env, &k.org))
            .cloned()
            .collect();
        let types: Vec<TypeKey> = self
            .loaded
            .range((Bound::Included(prefix.lower_type()), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.app == prefix.app)
            .filter(|k| prefix.contains(&k.app, &k.env, &k.org))
            .cloned()
            .collect();

        let removed = keys.len();
        self.remove_entry_keys(keys);
        for key in &types {
            self.loaded.remove(key);
        }
        removed
    }

    fn mark_loaded(&mut self, key: TypeKey) {
        self.next_seq += 1;
        self.loaded.insert(
            key,
            LoadedSet {
                loaded_at: Instant::now(),
                seq: self.next_seq,
            },
        );
    }

    fn is_fresh(&self, key: &TypeKey, ttl: Duration) -> bool {
        self.loaded
            .get(key)
            .is_some_and(|set| set.loaded_at.elapsed() < ttl)
    }

    fn evict_oldest(&mut self) -> Option<TypeKey> {
        let oldest = self
            .loaded
            .iter()
            .min_by_key(|(_, set)| set.seq)
            .map(|(k, _)| k.clone())?;
        self.remove_type(&oldest);
        Some(oldest)
    }
}

// =============================================================================
// Policy Cache
// =============================================================================

/// Scoped index of compiled policies.
///
/// A single reader/writer lock guards the whole index: lookups share the read
/// side, while puts, loads and invalidations take the write side.
pub struct PolicyCache {
    index: RwLock<CacheIndex>,
    ttl: Duration,
    max_loaded: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

impl PolicyCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.local_ttl, config.local_max_size)
    }

    /// Create a cache with an explicit TTL and loaded-set bound.
    #[must_use]
    pub fn with_limits(ttl: Duration, max_loaded: usize) -> Self {
        Self {
            index: RwLock::new(CacheIndex::default()),
            ttl,
            max_loaded: max_loaded.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Compiled, enabled policies applicable to a request.
    ///
    /// Returns `None` on a miss: either the requested resource type or the
    /// `*` type has not been loaded for the scope, or it has expired. A hit
    /// returns the union of entries for the action and the wildcard action,
    /// deduplicated and ordered by priority (highest first).
    pub async fn lookup(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        action: &str,
    ) -> Option<Vec<Arc<CompiledPolicy>>> {
        let index = self.index.read().await;

        let exact = TypeKey::new(scope, resource_type);
        let any = TypeKey::new(scope, WILDCARD);
        if !index.is_fresh(&exact, self.ttl) || !index.is_fresh(&any, self.ttl) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                scope = %scope,
                resource_type = resource_type,
                action = action,
                "Policy cache miss"
            );
            return None;
        }

        let mut candidates = Vec::new();
        for rt in lookup_types(resource_type) {
            for act in lookup_types(action) {
                if let Some(list) = index.entries.get(&CacheKey::new(scope, rt, act)) {
                    candidates.extend(list.iter().cloned());
                }
            }
        }
        drop(index);

        self.hits.fetch_add(1, Ordering::Relaxed);
        let candidates = order_candidates(candidates);
        tracing::debug!(
            scope = %scope,
            resource_type = resource_type,
            action = action,
            candidates = candidates.len(),
            "Policy cache hit"
        );
        Some(candidates)
    }

    /// Index one compiled policy under every action it lists.
    ///
    /// Any earlier entries for the same policy id are replaced.
    pub async fn put(&self, policy: Arc<CompiledPolicy>) {
        let mut index = self.index.write().await;
        index.bump_scope(scope_key(&policy.scope));
        index.insert(policy);
    }

    /// The current write generation for `scope`. Take it before reading
    /// the store and hand it to [`PolicyCache::load`].
    pub async fn ticket(&self, scope: &TenantScope) -> LoadTicket {
        self.index.read().await.ticket(&scope_key(scope))
    }

    /// Replace the full set of compiled policies for `(scope, resource_type)`
    /// and mark it loaded.
    ///
    /// Policies whose resource type differs from `resource_type` are ignored.
    /// Returns `false`, leaving the cache untouched, when a put or an
    /// invalidation has happened since `ticket` was taken.
    pub async fn load(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        policies: Vec<Arc<CompiledPolicy>>,
        ticket: LoadTicket,
    ) -> bool {
        let type_key = TypeKey::new(scope, resource_type);
        let mut index = self.index.write().await;
        if index.ticket(&scope_key(scope)) != ticket {
            tracing::debug!(
                scope = %scope,
                resource_type = resource_type,
                "Discarded policy set read before a concurrent write"
            );
            return false;
        }
        index.remove_type(&type_key);
        for policy in policies {
            if policy.resource_type == resource_type && policy.scope == *scope {
                index.insert(policy);
            }
        }
        index.mark_loaded(type_key);

        while index.loaded.len() > self.max_loaded {
            if let Some(evicted) = index.evict_oldest() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    app = %evicted.app,
                    env = %evicted.env,
                    resource_type = %evicted.resource_type,
                    "Evicted policy set from cache"
                );
            } else {
                break;
            }
        }
        true
    }

    /// Whether `(scope, resource_type)` is loaded and fresh.
    pub async fn is_loaded(&self, scope: &TenantScope, resource_type: &str) -> bool {
        let index = self.index.read().await;
        index.is_fresh(&TypeKey::new(scope, resource_type), self.ttl)
    }

    /// Remove one policy from every key it is indexed under.
    ///
    /// Returns `true` if the policy was cached.
    pub async fn invalidate_by_policy(&self, policy_id: Uuid) -> bool {
        let removed = {
            let mut index = self.index.write().await;
            // The policy's scope is unknown when it is not cached.
            index.epoch += 1;
            index.remove_policy(policy_id)
        };
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(policy_id = %policy_id, "Invalidated cached policy");
        }
        removed
    }

    /// Drop one loaded `(scope, resource type)` set so the next lookup
    /// reloads it.
    ///
    /// Returns `true` if the set was loaded.
    pub async fn invalidate_resource_type(&self, scope: &TenantScope, resource_type: &str) -> bool {
        let key = TypeKey::new(scope, resource_type);
        let mut index = self.index.write().await;
        let was_loaded = index.loaded.contains_key(&key);
        index.bump_scope(scope_key(scope));
        index.remove_type(&key);
        drop(index);

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            scope = %scope,
            resource_type = resource_type,
            "Invalidated cached policy set"
        );
        was_loaded
    }

    /// Remove everything cached for an application.
    pub async fn invalidate_by_app(&self, app_id: &str) -> usize {
        self.invalidate_prefix(Prefix {
            app: app_id,
            env: None,
            org: None,
        })
        .await
    }

    /// Remove everything cached for an environment, including every
    /// organization under it.
    pub async fn invalidate_by_environment(&self, app_id: &str, environment_id: &str) -> usize {
        self.invalidate_prefix(Prefix {
            app: app_id,
            env: Some(environment_id),
            org: None,
        })
        .await
    }

    /// Remove everything cached for one organization.
    pub async fn invalidate_by_organization(
        &self,
        app_id: &str,
        environment_id: &str,
        organization_id: &str,
    ) -> usize {
        self.invalidate_prefix(Prefix {
            app: app_id,
            env: Some(environment_id),
            org: Some(organization_id),
        })
        .await
    }

    async fn invalidate_prefix(&self, prefix: Prefix<'_>) -> usize {
        let removed = {
            let mut index = self.index.write().await;
            index.epoch += 1;
            index.remove_prefix(prefix)
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            app = prefix.app,
            env = prefix.env,
            org = prefix.org,
            removed = removed,
            "Invalidated policy cache scope"
        );
        removed
    }

    /// Drop everything.
    pub async fn clear(&self) {
        let mut index = self.index.write().await;
        let epoch = index.epoch + 1;
        *index = CacheIndex {
            epoch,
            ..CacheIndex::default()
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> PolicyCacheStats {
        let index = self.index.read().await;
        PolicyCacheStats {
            entry_count: index.entries.len(),
            policy_count: index.by_policy.len(),
            loaded_sets: index.loaded.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            ttl: self.ttl,
        }
    }
}

/// Deduplicate by policy id and order by priority, highest first.
///
/// Ties are broken by name and then id so the order is stable across calls.
#[must_use]
pub fn order_candidates(mut candidates: Vec<Arc<CompiledPolicy>>) -> Vec<Arc<CompiledPolicy>> {
    let mut seen = HashSet::new();
    candidates.retain(|p| seen.insert(p.policy_id));
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.policy_id.cmp(&b.policy_id))
    });
    candidates
}

fn lookup_types(value: &str) -> impl Iterator<Item = &str> {
    let wildcard = (value != WILDCARD).then_some(WILDCARD);
    std::iter::once(value).chain(wildcard)
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Statistics about the policy cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCacheStats {
    /// Number of index keys.
    pub entry_count: usize,

    /// Number of distinct cached policies.
    pub policy_count: usize,

    /// Number of loaded `(scope, resource type)` sets.
    pub loaded_sets: usize,

    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub evictions: u64,

    /// Local TTL.
    pub ttl: Duration,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
impl PolicyCache {
    /// `load` with a ticket taken just now.
    pub(crate) async fn load_fresh(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        policies: Vec<Arc<CompiledPolicy>>,
    ) {
        let ticket = self.ticket(scope).await;
        assert!(self.load(scope, resource_type, policies, ticket).await);
    }
}
