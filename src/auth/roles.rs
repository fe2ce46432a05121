//! Role names and the named role groups that policies are written against.

use std::collections::HashSet;

pub const ROLE_ADMINISTRATOR: &str = "Administrator";
pub const ROLE_ARCHIVIST: &str = "Archivist";
pub const ROLE_CURATOR: &str = "Curator";
pub const ROLE_HACKER: &str = "Hacker";
pub const ROLE_HUNTER: &str = "Hunter";
pub const ROLE_MECHANIC: &str = "Mechanic";
pub const ROLE_MODERATOR: &str = "Moderator";
pub const ROLE_TESTER: &str = "Tester";
pub const ROLE_THE_BLUE: &str = "The Blue";
pub const ROLE_THE_D: &str = "The D";
pub const ROLE_TRIAL_CURATOR: &str = "Trial Curator";
pub const ROLE_TRIAL_EDITOR: &str = "Trial Editor";

/// A fixed, named list of roles used on the right-hand side of role predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleGroup {
    /// May mark submissions as added.
    Adder,
    /// May approve, reject, verify and assign submissions.
    Decider,
    /// May soft-delete things.
    Deleter,
    /// May trigger maintenance jobs and manage sessions.
    God,
    /// May access and interact with all submissions.
    Staff,
    TrialCurator,
    TrialEditor,
}

impl RoleGroup {
    pub fn name(self) -> &'static str {
        match self {
            RoleGroup::Adder => "adder",
            RoleGroup::Decider => "decider",
            RoleGroup::Deleter => "deleter",
            RoleGroup::God => "god",
            RoleGroup::Staff => "staff",
            RoleGroup::TrialCurator => "trial-curator",
            RoleGroup::TrialEditor => "trial-editor",
        }
    }

    pub fn members(self) -> &'static [&'static str] {
        match self {
            RoleGroup::Adder => &[ROLE_MODERATOR, ROLE_ADMINISTRATOR],
            RoleGroup::Decider => &[ROLE_CURATOR, ROLE_TESTER],
            RoleGroup::Deleter => &[ROLE_ADMINISTRATOR, ROLE_MODERATOR],
            RoleGroup::God => &[ROLE_THE_BLUE, ROLE_THE_D],
            RoleGroup::Staff => &[
                ROLE_ADMINISTRATOR,
                ROLE_MODERATOR,
                ROLE_CURATOR,
                ROLE_HACKER,
                ROLE_TESTER,
                ROLE_ARCHIVIST,
                ROLE_MECHANIC,
                ROLE_HUNTER,
                ROLE_THE_BLUE,
                ROLE_THE_D,
            ],
            RoleGroup::TrialCurator => &[ROLE_TRIAL_CURATOR],
            RoleGroup::TrialEditor => &[ROLE_TRIAL_EDITOR],
        }
    }

    pub fn contains(self, role: &str) -> bool {
        self.members().contains(&role)
    }
}

/// The roles one identity holds, resolved fresh for each request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(HashSet<String>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// At least one held role belongs to `group`.
    pub fn intersects(&self, group: RoleGroup) -> bool {
        self.iter().any(|role| group.contains(role))
    }

    /// No held role falls outside `group`. Vacuously true for an empty set.
    pub fn is_subset_of(&self, group: RoleGroup) -> bool {
        self.iter().all(|role| group.contains(role))
    }

    /// Neither staff nor trial curator: may submit one curation and interact only with it.
    pub fn is_in_audit(&self) -> bool {
        !(self.intersects(RoleGroup::Staff) || self.intersects(RoleGroup::TrialCurator))
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
