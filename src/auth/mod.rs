//! Authentication and declarative authorization.
//!
//! Routes declare a [`Predicate`] tree; the [`AuthorizationEngine`] resolves
//! the caller from the request credential and evaluates the tree against it.

mod engine;
mod identity;
mod predicate;
pub mod roles;

use thiserror::Error;

pub use engine::AuthorizationEngine;
pub use identity::{extract_credential, hash_secret, AuthToken, IdentityStore, UserId, LOGIN_COOKIE};
pub use predicate::{
    BypassRule, Evaluation, Predicate, PredicateError, RequestFacts, ResourceKey, ResourceKind,
    ResourceStore,
};
pub use roles::{RoleGroup, RoleSet};

/// Failure reported by an identity or resource store.
pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("you do not have the proper authorization to access this page")]
    Denied,
    #[error(transparent)]
    Predicate(#[from] PredicateError),
    #[error("failed to resolve identity: {0}")]
    Lookup(LookupError),
}
