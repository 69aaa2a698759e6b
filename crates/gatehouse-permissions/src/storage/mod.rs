//! Storage traits consumed by the permissions engine.
//!
//! - [`PolicyStore`] - durable policies, namespaces, resources and actions
//! - [`SharedPolicyCache`] - optional cross-process cache of raw policies
//!
//! The audit log and the legacy RBAC source are defined next to the code
//! that uses them, in [`crate::audit`] and [`crate::migration`].
//!
//! # Implementations
//!
//! - `gatehouse-permissions-memory` - in-memory backends

mod policy;
mod shared;

pub use policy::PolicyStore;
pub use shared::SharedPolicyCache;
