//! Composable access-control predicates.
//!
//! A [`Predicate`] is a tree of checks over the resolved identity and facts
//! taken from the request (path and query parameters). Leaves consult the
//! role and resource stores read-only; `All` and `Any` short-circuit in
//! declaration order.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::{IdentityStore, LookupError, RoleGroup, RoleSet, UserId};
use crate::storage::models::Action;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kinds of resources that have an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Submission,
    SubmissionFile,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Submission => write!(f, "submission"),
            ResourceKind::SubmissionFile => write!(f, "submission file"),
        }
    }
}

/// Path parameters that address owned resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKey {
    /// `submission-id`: one submission.
    SubmissionId,
    /// `submission-ids`: comma-separated submissions.
    SubmissionIds,
    /// `file-id`: one submission file.
    FileId,
}

impl ResourceKey {
    pub fn param(self) -> &'static str {
        match self {
            ResourceKey::SubmissionId => "submission-id",
            ResourceKey::SubmissionIds => "submission-ids",
            ResourceKey::FileId => "file-id",
        }
    }

    pub fn kind(self) -> ResourceKind {
        match self {
            ResourceKey::SubmissionId | ResourceKey::SubmissionIds => ResourceKind::Submission,
            ResourceKey::FileId => ResourceKind::SubmissionFile,
        }
    }
}

/// Resource store consulted by ownership and limit predicates.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Owner of a resource, `None` when it does not exist.
    async fn owner_of(&self, kind: ResourceKind, id: u64) -> Result<Option<UserId>, LookupError>;
    /// How many resources of `kind` the user currently holds.
    async fn count_owned(&self, kind: ResourceKind, user: UserId) -> Result<u64, LookupError>;
}

/// Request-derived inputs visible to predicates.
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    path: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl RequestFacts {
    pub fn new(path: HashMap<String, String>, query: HashMap<String, String>) -> Self {
        Self { path, query }
    }

    pub fn with_path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.insert(key.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path.get(key).map(String::as_str)
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("missing path parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("invalid {key} '{value}'")]
    InvalidParameter { key: &'static str, value: String },
    #[error("{kind} with id {id} not found")]
    ResourceNotFound { kind: ResourceKind, id: u64 },
    #[error("lookup failed: {0}")]
    Lookup(LookupError),
}

/// An access-control check over an identity and a request.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Holds at least one role of the group.
    RoleAny(RoleGroup),
    /// Holds no role outside the group.
    ///
    /// This is closed membership, not "holds every listed role": an identity
    /// with no roles at all passes.
    RoleExclusiveSubset(RoleGroup),
    /// Owns the resource named by the path parameter.
    OwnsResource(ResourceKey),
    /// Owns every resource in the comma-separated path parameter.
    OwnsAllResources(ResourceKey),
    /// Currently owns fewer than `n` resources of the key's kind.
    WithinResourceLimit(ResourceKey, u64),
    /// Matches one specific identity regardless of roles.
    ExactIdentity(UserId),
    /// The `action` query parameter is one the identity's roles may perform.
    CanPerformAction,
    Not(Box<Predicate>),
    /// Every predicate holds; stops at the first failure or error.
    All(Vec<Predicate>),
    /// At least one predicate holds; stops at the first success.
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::All(predicates.into_iter().collect())
    }

    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Any(predicates.into_iter().collect())
    }

    /// Passes for every authenticated identity.
    pub fn authenticated() -> Self {
        Predicate::All(Vec::new())
    }

    pub fn negate(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Neither staff nor trial curator.
    pub fn in_audit() -> Self {
        Predicate::negate(Predicate::any([
            Predicate::RoleAny(RoleGroup::Staff),
            Predicate::RoleAny(RoleGroup::TrialCurator),
        ]))
    }

    pub fn evaluate<'a>(
        &'a self,
        ctx: &'a Evaluation<'a>,
    ) -> BoxFuture<'a, Result<bool, PredicateError>> {
        Box::pin(async move {
            match self {
                Predicate::RoleAny(group) => Ok(ctx.roles().await?.intersects(*group)),
                Predicate::RoleExclusiveSubset(group) => {
                    Ok(ctx.roles().await?.is_subset_of(*group))
                }
                Predicate::OwnsResource(key) => {
                    let id = parse_id(*key, ctx.required_param(*key)?)?;
                    ctx.owns(key.kind(), id).await
                }
                Predicate::OwnsAllResources(key) => {
                    let raw = ctx.required_param(*key)?;
                    let ids = raw
                        .split(',')
                        .map(|part| parse_id(*key, part.trim()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for id in ids {
                        if !ctx.owns(key.kind(), id).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Predicate::WithinResourceLimit(key, limit) => {
                    let owned = ctx
                        .resources
                        .count_owned(key.kind(), ctx.user)
                        .await
                        .map_err(PredicateError::Lookup)?;
                    Ok(owned < *limit)
                }
                Predicate::ExactIdentity(user) => Ok(ctx.user == *user),
                Predicate::CanPerformAction => {
                    let Some(action) = ctx.facts.query_param("action").and_then(Action::parse)
                    else {
                        return Ok(false);
                    };
                    let roles = ctx.roles().await?;
                    Ok(match action {
                        Action::Comment => true,
                        Action::MarkAdded => roles.intersects(RoleGroup::Adder),
                        a if a.is_decision() => roles.intersects(RoleGroup::Decider),
                        _ => false,
                    })
                }
                Predicate::Not(inner) => Ok(!inner.evaluate(ctx).await?),
                Predicate::All(predicates) => {
                    for predicate in predicates {
                        if !predicate.evaluate(ctx).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Predicate::Any(predicates) => {
                    // An error does not mask a later success
                    let mut last_error = None;
                    for predicate in predicates {
                        match predicate.evaluate(ctx).await {
                            Ok(true) => return Ok(true),
                            Ok(false) => {}
                            Err(e) => last_error = Some(e),
                        }
                    }
                    match last_error {
                        Some(e) => Err(e),
                        None => Ok(false),
                    }
                }
            }
        })
    }
}

/// Named allow-list of identities that pass regardless of role.
#[derive(Debug, Clone, Default)]
pub struct BypassRule {
    pub name: String,
    pub allowed: Vec<UserId>,
}

impl BypassRule {
    pub fn new(name: impl Into<String>, allowed: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            name: name.into(),
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Any of the allowed identities. An empty list never matches.
    pub fn predicate(&self) -> Predicate {
        Predicate::any(self.allowed.iter().copied().map(Predicate::ExactIdentity))
    }
}

/// State for evaluating one predicate tree against one request.
///
/// The role set is fetched at most once per evaluation and dropped with it.
pub struct Evaluation<'a> {
    identity: &'a dyn IdentityStore,
    resources: &'a dyn ResourceStore,
    facts: &'a RequestFacts,
    user: UserId,
    roles: OnceCell<RoleSet>,
}

impl<'a> Evaluation<'a> {
    pub fn new(
        identity: &'a dyn IdentityStore,
        resources: &'a dyn ResourceStore,
        facts: &'a RequestFacts,
        user: UserId,
    ) -> Self {
        Self {
            identity,
            resources,
            facts,
            user,
            roles: OnceCell::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    async fn roles(&self) -> Result<&RoleSet, PredicateError> {
        self.roles
            .get_or_try_init(|| async {
                self.identity
                    .role_set_of(self.user)
                    .await
                    .map_err(PredicateError::Lookup)
            })
            .await
    }

    fn required_param(&self, key: ResourceKey) -> Result<&'a str, PredicateError> {
        self.facts
            .path_param(key.param())
            .ok_or(PredicateError::MissingParameter(key.param()))
    }

    async fn owns(&self, kind: ResourceKind, id: u64) -> Result<bool, PredicateError> {
        let owner = self
            .resources
            .owner_of(kind, id)
            .await
            .map_err(PredicateError::Lookup)?
            .ok_or(PredicateError::ResourceNotFound { kind, id })?;
        Ok(owner == self.user)
    }
}

fn parse_id(key: ResourceKey, value: &str) -> Result<u64, PredicateError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| PredicateError::InvalidParameter {
            key: key.param(),
            value: value.to_string(),
        })
}
