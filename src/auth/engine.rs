use std::sync::Arc;

use super::{AuthError, Evaluation, IdentityStore, Predicate, RequestFacts, ResourceStore, UserId};

/// Resolves request credentials and evaluates route policies.
#[derive(Clone)]
pub struct AuthorizationEngine {
    identities: Arc<dyn IdentityStore>,
    resources: Arc<dyn ResourceStore>,
}

impl AuthorizationEngine {
    pub fn new(identities: Arc<dyn IdentityStore>, resources: Arc<dyn ResourceStore>) -> Self {
        Self {
            identities,
            resources,
        }
    }

    /// Resolve a credential to a user. Missing, unknown and expired
    /// credentials all fail with `AuthenticationRequired`.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<UserId, AuthError> {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            return Err(AuthError::AuthenticationRequired);
        };

        match self
            .identities
            .resolve_identity(credential)
            .await
            .map_err(AuthError::Lookup)?
        {
            Some(user) if !user.is_anonymous() => Ok(user),
            _ => Err(AuthError::AuthenticationRequired),
        }
    }

    /// Evaluate `policy` for an already-resolved user.
    pub async fn check(
        &self,
        user: UserId,
        facts: &RequestFacts,
        policy: &Predicate,
    ) -> Result<bool, AuthError> {
        let evaluation = Evaluation::new(
            self.identities.as_ref(),
            self.resources.as_ref(),
            facts,
            user,
        );
        Ok(policy.evaluate(&evaluation).await?)
    }

    /// Authenticate, then evaluate `policy`. Returns the caller on success.
    pub async fn authorize(
        &self,
        credential: Option<&str>,
        facts: &RequestFacts,
        policy: &Predicate,
    ) -> Result<UserId, AuthError> {
        let user = self.authenticate(credential).await?;
        if self.check(user, facts, policy).await? {
            Ok(user)
        } else {
            Err(AuthError::Denied)
        }
    }

    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::roles::*;
    use crate::auth::{BypassRule, LookupError, PredicateError, ResourceKey, ResourceKind, RoleGroup, RoleSet};

    #[derive(Default)]
    struct MemoryStore {
        sessions: HashMap<String, UserId>,
        roles: HashMap<UserId, Vec<&'static str>>,
        owners: HashMap<(ResourceKind, u64), UserId>,
        role_lookups: AtomicUsize,
        fail_owner_lookups: bool,
    }

    #[async_trait]
    impl IdentityStore for MemoryStore {
        async fn resolve_identity(&self, credential: &str) -> Result<Option<UserId>, LookupError> {
            Ok(self.sessions.get(credential).copied())
        }

        async fn role_set_of(&self, user: UserId) -> Result<RoleSet, LookupError> {
            self.role_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(RoleSet::from_iter(
                self.roles.get(&user).cloned().unwrap_or_default(),
            ))
        }
    }

    #[async_trait]
    impl ResourceStore for MemoryStore {
        async fn owner_of(&self, kind: ResourceKind, id: u64) -> Result<Option<UserId>, LookupError> {
            if self.fail_owner_lookups {
                return Err("store unavailable".into());
            }
            Ok(self.owners.get(&(kind, id)).copied())
        }

        async fn count_owned(&self, kind: ResourceKind, user: UserId) -> Result<u64, LookupError> {
            Ok(self
                .owners
                .iter()
                .filter(|((k, _), owner)| *k == kind && **owner == user)
                .count() as u64)
        }
    }

    fn build(store: MemoryStore) -> (AuthorizationEngine, Arc<MemoryStore>) {
        let store = Arc::new(store);
        (
            AuthorizationEngine::new(store.clone(), store.clone()),
            store,
        )
    }

    fn store_with(user: u64, roles: Vec<&'static str>) -> MemoryStore {
        let mut store = MemoryStore::default();
        store.sessions.insert("secret".to_string(), UserId(user));
        store.roles.insert(UserId(user), roles);
        store
    }

    #[tokio::test]
    async fn missing_or_unknown_credential_is_unauthenticated() {
        let (engine, _) = build(store_with(7, vec![ROLE_CURATOR]));
        let policy = Predicate::RoleAny(RoleGroup::Staff);
        let facts = RequestFacts::default();

        assert!(matches!(
            engine.authorize(None, &facts, &policy).await,
            Err(AuthError::AuthenticationRequired)
        ));
        assert!(matches!(
            engine.authorize(Some("nope"), &facts, &policy).await,
            Err(AuthError::AuthenticationRequired)
        ));
    }

    #[tokio::test]
    async fn role_any_allows_trial_curator() {
        let (engine, _) = build(store_with(7, vec![ROLE_TRIAL_CURATOR]));
        let policy = Predicate::any([
            Predicate::RoleAny(RoleGroup::Staff),
            Predicate::RoleAny(RoleGroup::TrialCurator),
        ]);

        let user = engine
            .authorize(Some("secret"), &RequestFacts::default(), &policy)
            .await
            .unwrap();
        assert_eq!(user, UserId(7));
    }

    #[tokio::test]
    async fn roles_fetched_once_per_evaluation() {
        let (engine, store) = build(store_with(7, vec!["Viewer"]));
        let policy = Predicate::any([
            Predicate::RoleAny(RoleGroup::Staff),
            Predicate::RoleAny(RoleGroup::TrialCurator),
            Predicate::RoleAny(RoleGroup::God),
        ]);

        let result = engine
            .authorize(Some("secret"), &RequestFacts::default(), &policy)
            .await;
        assert!(matches!(result, Err(AuthError::Denied)));
        assert_eq!(store.role_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn any_recovers_from_earlier_error() {
        let mut store = store_with(7, vec![ROLE_CURATOR]);
        store.fail_owner_lookups = true;
        let (engine, _) = build(store);

        let policy = Predicate::any([
            Predicate::OwnsResource(ResourceKey::SubmissionId),
            Predicate::RoleAny(RoleGroup::Staff),
        ]);
        let facts = RequestFacts::default().with_path_param("submission-id", "3");

        assert_eq!(
            engine.authorize(Some("secret"), &facts, &policy).await.unwrap(),
            UserId(7)
        );
    }

    #[tokio::test]
    async fn any_surfaces_last_error_when_nothing_passes() {
        let (engine, _) = build(store_with(7, vec!["Viewer"]));
        let policy = Predicate::any([
            Predicate::RoleAny(RoleGroup::Staff),
            Predicate::OwnsResource(ResourceKey::SubmissionId),
        ]);
        let facts = RequestFacts::default().with_path_param("submission-id", "abc");

        let result = engine.authorize(Some("secret"), &facts, &policy).await;
        assert!(matches!(
            result,
            Err(AuthError::Predicate(PredicateError::InvalidParameter { .. }))
        ));
    }

    #[tokio::test]
    async fn all_stops_at_first_failure() {
        let mut store = store_with(7, vec!["Viewer"]);
        store.fail_owner_lookups = true;
        let (engine, _) = build(store);

        // The ownership lookup would error if it were reached
        let policy = Predicate::all([
            Predicate::RoleAny(RoleGroup::Staff),
            Predicate::OwnsResource(ResourceKey::SubmissionId),
        ]);
        let facts = RequestFacts::default().with_path_param("submission-id", "3");

        assert!(matches!(
            engine.authorize(Some("secret"), &facts, &policy).await,
            Err(AuthError::Denied)
        ));
    }

    #[tokio::test]
    async fn exclusive_subset_rejects_outside_role() {
        let (engine, _) = build(store_with(7, vec![ROLE_THE_D, ROLE_TRIAL_EDITOR]));
        let policy = Predicate::RoleExclusiveSubset(RoleGroup::God);
        assert!(!engine
            .check(UserId(7), &RequestFacts::default(), &policy)
            .await
            .unwrap());

        let (engine, _) = build(store_with(7, vec![]));
        assert!(engine
            .check(UserId(7), &RequestFacts::default(), &policy)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ownership_of_every_listed_resource() {
        let mut store = store_with(7, vec![]);
        store.owners.insert((ResourceKind::Submission, 1), UserId(7));
        store.owners.insert((ResourceKind::Submission, 2), UserId(7));
        store.owners.insert((ResourceKind::Submission, 3), UserId(8));
        let (engine, _) = build(store);
        let policy = Predicate::OwnsAllResources(ResourceKey::SubmissionIds);

        let mine = RequestFacts::default().with_path_param("submission-ids", "1,2");
        assert!(engine.check(UserId(7), &mine, &policy).await.unwrap());

        let mixed = RequestFacts::default().with_path_param("submission-ids", "1,3");
        assert!(!engine.check(UserId(7), &mixed, &policy).await.unwrap());

        let missing = RequestFacts::default().with_path_param("submission-ids", "1,99");
        assert!(matches!(
            engine.check(UserId(7), &missing, &policy).await,
            Err(AuthError::Predicate(PredicateError::ResourceNotFound { id: 99, .. }))
        ));
    }

    #[tokio::test]
    async fn resource_limit_counts_owned() {
        let mut store = store_with(7, vec![]);
        store.owners.insert((ResourceKind::Submission, 1), UserId(7));
        let (engine, _) = build(store);
        let facts = RequestFacts::default();

        let one = Predicate::WithinResourceLimit(ResourceKey::SubmissionId, 1);
        assert!(!engine.check(UserId(7), &facts, &one).await.unwrap());

        let two = Predicate::WithinResourceLimit(ResourceKey::SubmissionId, 2);
        assert!(engine.check(UserId(7), &facts, &two).await.unwrap());
        assert!(engine.check(UserId(8), &facts, &one).await.unwrap());
    }

    #[tokio::test]
    async fn action_permissions_follow_roles() {
        let (engine, _) = build(store_with(7, vec![ROLE_TESTER]));
        let policy = Predicate::CanPerformAction;
        let facts = |action: &str| RequestFacts::default().with_query_param("action", action);

        assert!(engine.check(UserId(7), &facts("comment"), &policy).await.unwrap());
        assert!(engine.check(UserId(7), &facts("approve"), &policy).await.unwrap());
        assert!(!engine.check(UserId(7), &facts("mark-added"), &policy).await.unwrap());
        assert!(!engine.check(UserId(7), &facts("bogus"), &policy).await.unwrap());
    }

    #[tokio::test]
    async fn bypass_matches_only_listed_identity() {
        let (engine, _) = build(store_with(7, vec![]));
        let facts = RequestFacts::default();

        let rule = BypassRule::new("maintainers", [UserId(7)]);
        assert!(engine.check(UserId(7), &facts, &rule.predicate()).await.unwrap());
        assert!(!engine.check(UserId(8), &facts, &rule.predicate()).await.unwrap());

        let empty = BypassRule::new("nobody", Vec::new());
        assert!(!engine.check(UserId(7), &facts, &empty.predicate()).await.unwrap());
    }

    #[tokio::test]
    async fn audit_user_passes_in_audit() {
        let (engine, _) = build(store_with(7, vec!["Viewer"]));
        let facts = RequestFacts::default();
        assert!(engine
            .check(UserId(7), &facts, &Predicate::in_audit())
            .await
            .unwrap());

        let (engine, _) = build(store_with(7, vec![ROLE_MODERATOR]));
        assert!(!engine
            .check(UserId(7), &facts, &Predicate::in_audit())
            .await
            .unwrap());
    }
}
