//! Domain model.

mod context;
mod decision;
mod namespace;
mod policy;
mod scope;

pub use context::{
    Attributes, EvaluationContext, PrincipalContext, RequestContext, ResourceContext,
};
pub use decision::{Decision, EvaluateRequest};
pub use namespace::{
    ActionDefinition, CreateActionRequest, CreateNamespaceRequest, CreateResourceRequest,
    DEFAULT_NAMESPACE, Namespace, ResourceAttribute, ResourceDefinition, UpdateNamespaceRequest,
};
pub use policy::{
    CreatePolicyRequest, DEFAULT_PAGE_SIZE, Page, Policy, PolicyFilter, UpdatePolicyRequest,
    WILDCARD,
};
pub(crate) use policy::validate_targets;
pub use scope::{SCOPE_SEPARATOR, TenantScope};
