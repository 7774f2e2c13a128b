#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Returns the project code name.
#[must_use]
pub const fn project_name() -> &'static str {
    "tribewarden"
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("name is invalid")]
    InvalidName,
    #[error("display name is invalid")]
    InvalidDisplayName,
    #[error("member status is invalid")]
    InvalidMemberStatus,
    #[error("visibility area is invalid")]
    InvalidVisibilityArea,
    #[error("wallet address is invalid")]
    InvalidWalletAddress,
    #[error("entity id is invalid")]
    InvalidEntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(Ulid);

impl EntityId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for EntityId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Ulid::from_string(&value).map_err(|_| DomainError::InvalidEntityId)?;
        Ok(Self(parsed))
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A role name as stored and matched by the authorization resolver.
/// Comparison is exact: no case folding, no trimming beyond construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleName(String);

impl RoleName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoleName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RankName(String);

impl RankName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RankName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessListName(String);

impl AccessListName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccessListName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > 128 {
            return Err(DomainError::InvalidDisplayName);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletAddress(String);

impl WalletAddress {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_wallet_address(&value)?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Pending,
    Suspended,
}

impl MemberStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
        }
    }
}

impl TryFrom<String> for MemberStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "suspended" => Ok(Self::Suspended),
            _ => Err(DomainError::InvalidMemberStatus),
        }
    }
}

/// An area of the console whose list reads can be toggled public.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityArea {
    Members,
    Roles,
}

impl VisibilityArea {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Roles => "roles",
        }
    }

    /// Default when no setting has been stored for the area.
    #[must_use]
    pub const fn default_is_public(self) -> bool {
        match self {
            Self::Members => true,
            Self::Roles => false,
        }
    }
}

impl TryFrom<String> for VisibilityArea {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "members" => Ok(Self::Members),
            "roles" => Ok(Self::Roles),
            _ => Err(DomainError::InvalidVisibilityArea),
        }
    }
}

/// Flat membership check against one access list. The actor's role name
/// must appear verbatim in the list's role set; an anonymous actor or a
/// list that does not exist always denies. There is no hierarchy and no
/// wildcard role.
#[must_use]
pub fn can_perform(actor_role: Option<&str>, access_list_roles: Option<&[String]>) -> bool {
    let Some(role) = actor_role else {
        return false;
    };
    let Some(roles) = access_list_roles else {
        return false;
    };
    roles.iter().any(|r| r == role)
}

/// Whether a gated area may be read. A stored setting always wins over
/// the built-in default, and authenticated callers bypass the gate.
#[must_use]
pub fn area_is_readable(
    area: VisibilityArea,
    stored_is_public: Option<bool>,
    is_authenticated: bool,
) -> bool {
    if is_authenticated {
        return true;
    }
    stored_is_public.unwrap_or(area.default_is_public())
}

/// A rank as seen by the composition resolver: either global
/// (`scope_role_id == None`) or scoped to one owning role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankRef {
    pub rank_id: String,
    pub name: String,
    pub sort_order: i32,
    pub scope_role_id: Option<String>,
}

/// One explicit role-to-rank binding with its own ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankBinding {
    pub rank_id: String,
    pub sort_order: i32,
}

/// Resolves which ranks a role offers, in display order.
///
/// With no bindings the role falls back to the entire global pool in the
/// pool's own order. With at least one binding the bound set replaces the
/// pool entirely, ordered by binding order. Ranks scoped to the role are
/// always offered: bound ones sort with their binding, unbound ones are
/// appended in their own order.
#[must_use]
pub fn available_ranks_for(
    role_id: &str,
    ranks: &[RankRef],
    bindings: &[RankBinding],
) -> Vec<RankRef> {
    let owned = |r: &RankRef| r.scope_role_id.as_deref() == Some(role_id);

    if bindings.is_empty() {
        let mut pool: Vec<RankRef> = ranks
            .iter()
            .filter(|r| r.scope_role_id.is_none() || owned(r))
            .cloned()
            .collect();
        sort_ranks(&mut pool);
        return pool;
    }

    let mut bound: Vec<(i32, RankRef)> = Vec::new();
    for binding in bindings {
        if let Some(rank) = ranks.iter().find(|r| r.rank_id == binding.rank_id) {
            bound.push((binding.sort_order, rank.clone()));
        }
    }
    bound.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.name.cmp(&b.1.name))
            .then_with(|| a.1.rank_id.cmp(&b.1.rank_id))
    });
    let mut out: Vec<RankRef> = bound.into_iter().map(|(_, r)| r).collect();

    let mut extra_scoped: Vec<RankRef> = ranks
        .iter()
        .filter(|r| owned(r) && !out.iter().any(|b| b.rank_id == r.rank_id))
        .cloned()
        .collect();
    sort_ranks(&mut extra_scoped);
    out.extend(extra_scoped);
    out
}

fn sort_ranks(ranks: &mut [RankRef]) {
    ranks.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.rank_id.cmp(&b.rank_id))
    });
}

/// Resolves the display label for a rank viewed in the context of a role.
/// Role-scoped ranks keep their own name; global ranks take the per-role
/// override name when one exists.
#[must_use]
pub fn rank_label<'a>(
    rank_name: &'a str,
    rank_is_scoped: bool,
    override_name: Option<&'a str>,
) -> &'a str {
    if rank_is_scoped {
        return rank_name;
    }
    override_name.unwrap_or(rank_name)
}

/// Assigns dense one-based positions for a reorder request. Positions
/// follow the order ids were supplied in; duplicate ids keep their first
/// position.
#[must_use]
pub fn reorder_positions(ids: &[String]) -> Vec<(String, i32)> {
    let mut seen: Vec<(String, i32)> = Vec::with_capacity(ids.len());
    let mut next = 1;
    for id in ids {
        if seen.iter().any(|(existing, _)| existing == id) {
            continue;
        }
        seen.push((id.clone(), next));
        next += 1;
    }
    seen
}

fn validate_name(value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    if !(min..=max).contains(&value.len()) {
        return Err(DomainError::InvalidName);
    }

    if value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Ok(());
    }

    Err(DomainError::InvalidName)
}

fn validate_wallet_address(value: &str) -> Result<(), DomainError> {
    if !(1..=128).contains(&value.len()) {
        return Err(DomainError::InvalidWalletAddress);
    }
    if value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(());
    }
    Err(DomainError::InvalidWalletAddress)
}

#[cfg(test)]
mod tests {
    use super::{
        area_is_readable, available_ranks_for, can_perform, project_name, rank_label,
        reorder_positions, AccessListName, DisplayName, DomainError, EntityId, MemberStatus,
        RankBinding, RankRef, RoleName, VisibilityArea, WalletAddress,
    };

    fn global(id: &str, name: &str, sort: i32) -> RankRef {
        RankRef {
            rank_id: id.to_owned(),
            name: name.to_owned(),
            sort_order: sort,
            scope_role_id: None,
        }
    }

    fn scoped(id: &str, name: &str, sort: i32, role: &str) -> RankRef {
        RankRef {
            rank_id: id.to_owned(),
            name: name.to_owned(),
            sort_order: sort,
            scope_role_id: Some(role.to_owned()),
        }
    }

    fn binding(id: &str, sort: i32) -> RankBinding {
        RankBinding {
            rank_id: id.to_owned(),
            sort_order: sort,
        }
    }

    #[test]
    fn project_name_is_stable() {
        assert_eq!(project_name(), "tribewarden");
    }

    #[test]
    fn entity_id_round_trips() {
        let id = EntityId::new();
        let parsed = EntityId::try_from(id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(
            EntityId::try_from(String::from("not-a-ulid")).unwrap_err(),
            DomainError::InvalidEntityId
        );
    }

    #[test]
    fn name_invariants_enforced() {
        let role = RoleName::try_from(String::from("War Chief")).unwrap();
        assert_eq!(role.as_str(), "War Chief");
        assert_eq!(
            RoleName::try_from(String::new()).unwrap_err(),
            DomainError::InvalidName
        );
        assert!(AccessListName::try_from("a".repeat(65)).is_err());
        assert!(RoleName::try_from(String::from("bad\u{7f}name")).is_err());
    }

    #[test]
    fn display_name_trims_and_rejects_blank() {
        let name = DisplayName::try_from(String::from("  Ragnar  ")).unwrap();
        assert_eq!(name.as_str(), "Ragnar");
        assert_eq!(
            DisplayName::try_from(String::from("   ")).unwrap_err(),
            DomainError::InvalidDisplayName
        );
    }

    #[test]
    fn wallet_address_invariants_enforced() {
        let wallet = WalletAddress::try_from(String::from("0x1a2B3c4D5e6F")).unwrap();
        assert_eq!(wallet.as_str(), "0x1a2B3c4D5e6F");
        assert!(WalletAddress::try_from(String::from("has spaces")).is_err());
        assert!(WalletAddress::try_from(String::new()).is_err());
    }

    #[test]
    fn member_status_enforces_allowed_values() {
        assert_eq!(
            MemberStatus::try_from(String::from("active")).unwrap(),
            MemberStatus::Active
        );
        assert_eq!(MemberStatus::Suspended.as_str(), "suspended");
        assert_eq!(
            MemberStatus::try_from(String::from("banned")).unwrap_err(),
            DomainError::InvalidMemberStatus
        );
    }

    #[test]
    fn visibility_area_enforces_allowed_values() {
        assert_eq!(
            VisibilityArea::try_from(String::from("members")).unwrap(),
            VisibilityArea::Members
        );
        assert!(VisibilityArea::try_from(String::from("billing")).is_err());
    }

    #[test]
    fn membership_check_is_exact_and_denies_anonymous() {
        let roles = vec![String::from("Chief"), String::from("Elder")];
        assert!(can_perform(Some("Elder"), Some(&roles)));
        assert!(!can_perform(Some("elder"), Some(&roles)));
        assert!(!can_perform(Some("Warrior"), Some(&roles)));
        assert!(!can_perform(None, Some(&roles)));
        assert!(!can_perform(Some("Chief"), None));
    }

    #[test]
    fn visibility_defaults_differ_per_area() {
        assert!(area_is_readable(VisibilityArea::Members, None, false));
        assert!(!area_is_readable(VisibilityArea::Roles, None, false));
    }

    #[test]
    fn stored_visibility_overrides_default() {
        assert!(!area_is_readable(VisibilityArea::Members, Some(false), false));
        assert!(area_is_readable(VisibilityArea::Roles, Some(true), false));
    }

    #[test]
    fn authenticated_callers_bypass_visibility_gate() {
        assert!(area_is_readable(VisibilityArea::Roles, Some(false), true));
    }

    #[test]
    fn unbound_role_falls_back_to_global_pool() {
        let ranks = vec![
            global("r2", "Veteran", 2),
            global("r1", "Novice", 1),
            global("r3", "Master", 3),
        ];
        let available = available_ranks_for("role-a", &ranks, &[]);
        let names: Vec<&str> = available.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Novice", "Veteran", "Master"]);
    }

    #[test]
    fn bindings_replace_the_global_pool() {
        let ranks = vec![
            global("r1", "Novice", 1),
            global("r2", "Veteran", 2),
            global("r3", "Master", 3),
        ];
        let bindings = vec![binding("r3", 1), binding("r1", 2)];
        let available = available_ranks_for("role-a", &ranks, &bindings);
        let names: Vec<&str> = available.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Master", "Novice"]);
    }

    #[test]
    fn binding_to_unknown_rank_is_skipped() {
        let ranks = vec![global("r1", "Novice", 1)];
        let bindings = vec![binding("gone", 1), binding("r1", 2)];
        let available = available_ranks_for("role-a", &ranks, &bindings);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].rank_id, "r1");
    }

    #[test]
    fn scoped_ranks_always_available_to_owning_role() {
        let ranks = vec![
            global("r1", "Novice", 1),
            scoped("s1", "Shield Bearer", 1, "role-a"),
            scoped("s2", "Other Scoped", 1, "role-b"),
        ];

        // No bindings: pool plus own scoped ranks, never another role's.
        let available = available_ranks_for("role-a", &ranks, &[]);
        let ids: Vec<&str> = available.iter().map(|r| r.rank_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "s1"]);

        // Bindings that omit the scoped rank still surface it at the end.
        let bindings = vec![binding("r1", 1)];
        let available = available_ranks_for("role-a", &ranks, &bindings);
        let ids: Vec<&str> = available.iter().map(|r| r.rank_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "s1"]);
    }

    #[test]
    fn rank_ordering_ties_break_by_name_then_id() {
        let ranks = vec![
            global("r9", "Bravo", 5),
            global("r1", "Alpha", 5),
            global("r0", "Alpha", 5),
        ];
        let available = available_ranks_for("role-a", &ranks, &[]);
        let ids: Vec<&str> = available.iter().map(|r| r.rank_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r9"]);
    }

    #[test]
    fn rank_label_prefers_override_for_global_ranks_only() {
        assert_eq!(rank_label("Veteran", false, Some("Senior Veteran")), "Senior Veteran");
        assert_eq!(rank_label("Veteran", false, None), "Veteran");
        assert_eq!(rank_label("Shield Bearer", true, Some("ignored")), "Shield Bearer");
    }

    #[test]
    fn reorder_assigns_dense_one_based_positions() {
        let ids = vec![String::from("c"), String::from("a"), String::from("b")];
        assert_eq!(
            reorder_positions(&ids),
            vec![
                (String::from("c"), 1),
                (String::from("a"), 2),
                (String::from("b"), 3),
            ]
        );
    }

    #[test]
    fn reorder_ignores_duplicate_ids() {
        let ids = vec![String::from("a"), String::from("a"), String::from("b")];
        assert_eq!(
            reorder_positions(&ids),
            vec![(String::from("a"), 1), (String::from("b"), 2)]
        );
    }
}
