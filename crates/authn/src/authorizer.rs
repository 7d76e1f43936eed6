//! Role-claim authorization.
//!
//! Routes name the [`RoleGroup`]s they accept. The [`Authorizer`] expands them
//! through the configured [`RoleGroups`] into raw role strings and compares
//! those against the namespaced `roles` claim of the request's
//! [`AuthOutcome`].
//!
//! Claimed roles are lower-cased before comparison. Configured role strings
//! are compared as stored.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{AuthError, Result},
    jwt::{ClaimSet, namespaced_claim},
    middleware::AuthOutcome,
};

const ROLES_CLAIM: &str = "roles";
const USER_METADATA_CLAIM: &str = "user_metadata";
const APP_METADATA_CLAIM: &str = "app_metadata";

/// Prefix accepted in front of a group name, as in `user.roles.admin`.
const GROUP_NAME_PREFIX: &str = "user.roles.";

/// A recognized role group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleGroup {
    /// Super administrators.
    Super,
    /// Administrators.
    Admin,
    /// Employees.
    Employee,
    /// Customers.
    Customer,
}

impl RoleGroup {
    /// Every recognized group.
    pub const ALL: [Self; 4] = [Self::Super, Self::Admin, Self::Employee, Self::Customer];

    /// Configuration name of the group.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Super => "super",
            Self::Admin => "admin",
            Self::Employee => "employee",
            Self::Customer => "customer",
        }
    }
}

impl fmt::Display for RoleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RoleGroup {
    type Err = AuthError;

    /// Parses `admin` or `user.roles.admin`.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.strip_prefix(GROUP_NAME_PREFIX).unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|group| group.name() == name)
            .ok_or_else(|| AuthError::unknown_role_group(s))
    }
}

/// Immutable mapping from role group to the raw role strings it grants.
///
/// Every configured group maps to a non-empty list of non-empty strings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<RoleGroup, Vec<String>>")]
pub struct RoleGroups {
    groups: BTreeMap<RoleGroup, Vec<String>>,
}

impl RoleGroups {
    /// Validates and wraps a group mapping.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a group has no roles or an empty role
    /// string.
    pub fn new(groups: BTreeMap<RoleGroup, Vec<String>>) -> Result<Self> {
        for (group, roles) in &groups {
            if roles.is_empty() {
                return Err(AuthError::config(format!("role group {group} has no roles")));
            }
            if roles.iter().any(String::is_empty) {
                return Err(AuthError::config(format!("role group {group} has an empty role")));
            }
        }
        Ok(Self { groups })
    }

    /// Raw roles granted by `group`, if configured.
    #[must_use]
    pub fn roles(&self, group: RoleGroup) -> Option<&[String]> {
        self.groups.get(&group).map(Vec::as_slice)
    }

    /// Union of the raw roles of `groups`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownRoleGroup`] if a group is not configured.
    pub fn expand(&self, groups: &[RoleGroup]) -> Result<HashSet<&str>> {
        let mut expanded = HashSet::new();
        for &group in groups {
            let roles = self.roles(group).ok_or_else(|| AuthError::unknown_role_group(group.name()))?;
            expanded.extend(roles.iter().map(String::as_str));
        }
        Ok(expanded)
    }
}

impl Default for RoleGroups {
    fn default() -> Self {
        let groups = [
            (RoleGroup::Super, &["sa", "super admin"][..]),
            (RoleGroup::Admin, &["location administrator", "administrator", "admin"][..]),
            (RoleGroup::Employee, &["location employee", "employee"][..]),
            (RoleGroup::Customer, &["customer", "location customer"][..]),
        ]
        .into_iter()
        .map(|(group, roles)| (group, roles.iter().map(|r| (*r).to_owned()).collect()))
        .collect();
        Self { groups }
    }
}

impl TryFrom<BTreeMap<RoleGroup, Vec<String>>> for RoleGroups {
    type Error = AuthError;

    fn try_from(groups: BTreeMap<RoleGroup, Vec<String>>) -> Result<Self> {
        Self::new(groups)
    }
}

/// Answers role questions about an [`AuthOutcome`].
#[derive(Clone, Debug)]
pub struct Authorizer {
    namespace: Arc<str>,
    groups: Arc<RoleGroups>,
}

impl Authorizer {
    /// Creates an authorizer reading claims under `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<Arc<str>>, groups: RoleGroups) -> Self {
        Self { namespace: namespace.into(), groups: Arc::new(groups) }
    }

    /// The claim namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The configured role groups.
    #[must_use]
    pub fn role_groups(&self) -> &RoleGroups {
        &self.groups
    }

    /// Resolves group names such as `admin` or `user.roles.admin`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownRoleGroup`] for the first unrecognized or
    /// unconfigured name.
    pub fn resolve_names(&self, names: &[&str]) -> Result<Vec<RoleGroup>> {
        names
            .iter()
            .map(|name| {
                let group = name.parse::<RoleGroup>()?;
                match self.groups.roles(group) {
                    Some(_) => Ok(group),
                    None => Err(AuthError::unknown_role_group(*name)),
                }
            })
            .collect()
    }

    /// Whether the outcome's claimed roles intersect any of `groups`.
    ///
    /// Groups are checked before the outcome, so a bad group is reported even
    /// for unauthenticated requests. A rejected outcome yields `false` unless
    /// `fail_on_no_token` is set, in which case its failure is returned.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownRoleGroup`] if a group is not configured
    /// - [`AuthError::Unauthenticated`] if rejected and `fail_on_no_token`
    #[tracing::instrument(skip(self, outcome))]
    pub fn has_roles(&self, outcome: &AuthOutcome, groups: &[RoleGroup], fail_on_no_token: bool) -> Result<bool> {
        let expanded = self.groups.expand(groups)?;

        let claims = match outcome.as_result() {
            Ok(claims) => claims,
            Err(failure) if fail_on_no_token => return Err(failure.clone().into()),
            Err(_) => return Ok(false),
        };

        Ok(self.claimed_roles(claims).any(|role| expanded.contains(role.as_str())))
    }

    /// Single-group form of [`has_roles`](Self::has_roles).
    ///
    /// # Errors
    ///
    /// See [`has_roles`](Self::has_roles).
    pub fn has_role(&self, outcome: &AuthOutcome, group: RoleGroup, fail_on_no_token: bool) -> Result<bool> {
        self.has_roles(outcome, &[group], fail_on_no_token)
    }

    /// Requires an authenticated outcome with a role in one of `groups`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthenticated`] if the outcome is rejected
    /// - [`AuthError::UnknownRoleGroup`] if a group is not configured
    /// - [`AuthError::NotAuthorized`] if no claimed role matches
    pub fn authorize_to_roles(&self, outcome: &AuthOutcome, groups: &[RoleGroup]) -> Result<()> {
        if let Err(failure) = outcome.as_result() {
            return Err(failure.clone().into());
        }
        if self.has_roles(outcome, groups, true)? {
            Ok(())
        } else {
            tracing::debug!(groups = ?groups, "no claimed role matches");
            Err(AuthError::NotAuthorized)
        }
    }

    /// Single-group form of [`authorize_to_roles`](Self::authorize_to_roles).
    ///
    /// # Errors
    ///
    /// See [`authorize_to_roles`](Self::authorize_to_roles).
    pub fn authorize_to_role(&self, outcome: &AuthOutcome, group: RoleGroup) -> Result<()> {
        self.authorize_to_roles(outcome, &[group])
    }

    /// The namespaced `user_metadata` claim.
    ///
    /// With `empty_on_failure`, a rejected outcome or a missing or
    /// non-object claim yields an empty map.
    ///
    /// # Errors
    ///
    /// Without `empty_on_failure`: [`AuthError::Unauthenticated`] if the
    /// outcome is rejected, [`AuthError::MissingClaim`] if the claim is absent
    /// or not an object.
    pub fn user_metadata(&self, outcome: &AuthOutcome, empty_on_failure: bool) -> Result<Map<String, Value>> {
        self.metadata(outcome, USER_METADATA_CLAIM, empty_on_failure)
    }

    /// The namespaced `app_metadata` claim.
    ///
    /// # Errors
    ///
    /// See [`user_metadata`](Self::user_metadata).
    pub fn app_metadata(&self, outcome: &AuthOutcome, empty_on_failure: bool) -> Result<Map<String, Value>> {
        self.metadata(outcome, APP_METADATA_CLAIM, empty_on_failure)
    }

    fn metadata(&self, outcome: &AuthOutcome, name: &str, empty_on_failure: bool) -> Result<Map<String, Value>> {
        let found = outcome
            .as_result()
            .map_err(|failure| AuthError::from(failure.clone()))
            .and_then(|claims| match claims.namespaced(&self.namespace, name) {
                Some(Value::Object(map)) => Ok(map.clone()),
                _ => Err(AuthError::missing_claim(name)),
            });

        match found {
            Err(_) if empty_on_failure => Ok(Map::new()),
            other => other,
        }
    }

    fn claimed_roles<'a>(&self, claims: &'a ClaimSet) -> impl Iterator<Item = String> + 'a {
        let roles = claims
            .get(&namespaced_claim(&self.namespace, ROLES_CLAIM))
            .and_then(Value::as_array);
        roles.into_iter().flatten().filter_map(Value::as_str).map(str::to_lowercase)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{error::ErrorClass, middleware::AuthFailure};

    const NS: &str = "https://ns.example";

    fn authorizer() -> Authorizer {
        Authorizer::new(NS, RoleGroups::default())
    }

    fn with_claims(claims: Value) -> AuthOutcome {
        let claims: ClaimSet = serde_json::from_value(claims).unwrap();
        AuthOutcome::Authenticated(Arc::new(claims))
    }

    fn with_roles(roles: &[&str]) -> AuthOutcome {
        with_claims(json!({ format!("{NS}/roles"): roles }))
    }

    #[rstest]
    #[case("admin", RoleGroup::Admin)]
    #[case("user.roles.admin", RoleGroup::Admin)]
    #[case("super", RoleGroup::Super)]
    #[case("user.roles.customer", RoleGroup::Customer)]
    fn test_role_group_from_str(#[case] name: &str, #[case] expected: RoleGroup) {
        assert_eq!(name.parse::<RoleGroup>().unwrap(), expected);
    }

    #[rstest]
    #[case("wizard")]
    #[case("Admin")]
    #[case("user.roles.")]
    #[case("roles.admin")]
    fn test_role_group_from_str_unknown(#[case] name: &str) {
        let err = name.parse::<RoleGroup>().unwrap_err();
        assert!(matches!(err, AuthError::UnknownRoleGroup(ref n) if n == name));
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[rstest]
    #[case(&["Admin"], RoleGroup::Admin, true)]
    #[case(&["LOCATION EMPLOYEE"], RoleGroup::Employee, true)]
    #[case(&["customer"], RoleGroup::Admin, false)]
    #[case(&[], RoleGroup::Admin, false)]
    #[case(&["sa", "customer"], RoleGroup::Customer, true)]
    fn test_has_role(#[case] roles: &[&str], #[case] group: RoleGroup, #[case] expected: bool) {
        assert_eq!(authorizer().has_role(&with_roles(roles), group, true).unwrap(), expected);
    }

    #[test]
    fn test_has_roles_union_of_groups() {
        let outcome = with_roles(&["employee"]);
        let auth = authorizer();
        assert!(auth.has_roles(&outcome, &[RoleGroup::Admin, RoleGroup::Employee], true).unwrap());
        assert!(!auth.has_roles(&outcome, &[RoleGroup::Admin, RoleGroup::Super], true).unwrap());
    }

    #[test]
    fn test_configured_roles_are_case_sensitive() {
        let groups = RoleGroups::new(BTreeMap::from([(RoleGroup::Admin, vec!["Admin".to_owned()])])).unwrap();
        let auth = Authorizer::new(NS, groups);
        // Claimed roles are lower-cased, configured ones are not.
        assert!(!auth.has_role(&with_roles(&["Admin"]), RoleGroup::Admin, true).unwrap());
    }

    #[test]
    fn test_has_roles_ignores_malformed_roles_claim() {
        let auth = authorizer();
        let outcome = with_claims(json!({ format!("{NS}/roles"): "admin" }));
        assert!(!auth.has_role(&outcome, RoleGroup::Admin, true).unwrap());

        let outcome = with_claims(json!({ format!("{NS}/roles"): [1, null, "admin"] }));
        assert!(auth.has_role(&outcome, RoleGroup::Admin, true).unwrap());

        let outcome = with_claims(json!({ "roles": ["admin"] }));
        assert!(!auth.has_role(&outcome, RoleGroup::Admin, true).unwrap());
    }

    #[test]
    fn test_has_roles_rejected_outcome() {
        let outcome = AuthOutcome::Rejected(AuthFailure::MissingHeader);
        let auth = authorizer();

        assert!(!auth.has_role(&outcome, RoleGroup::Admin, false).unwrap());

        let err = auth.has_role(&outcome, RoleGroup::Admin, true).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(AuthFailure::MissingHeader)));
    }

    #[test]
    fn test_unconfigured_group_checked_before_outcome() {
        let groups = RoleGroups::new(BTreeMap::from([(RoleGroup::Admin, vec!["admin".to_owned()])])).unwrap();
        let auth = Authorizer::new(NS, groups);
        let outcome = AuthOutcome::Rejected(AuthFailure::MissingHeader);

        let err = auth.has_role(&outcome, RoleGroup::Super, false).unwrap_err();
        assert!(matches!(err, AuthError::UnknownRoleGroup(ref n) if n == "super"));
    }

    #[test]
    fn test_authorize_to_roles() {
        let auth = authorizer();
        auth.authorize_to_role(&with_roles(&["Administrator"]), RoleGroup::Admin).unwrap();

        let err = auth.authorize_to_role(&with_roles(&["customer"]), RoleGroup::Admin).unwrap_err();
        assert!(matches!(err, AuthError::NotAuthorized));
        assert_eq!(err.class(), ErrorClass::Unauthorized);

        let outcome = AuthOutcome::Rejected(AuthFailure::KeySetUnavailable);
        let err = auth.authorize_to_role(&outcome, RoleGroup::Admin).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(AuthFailure::KeySetUnavailable)));
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_resolve_names() {
        let auth = authorizer();
        let groups = auth.resolve_names(&["user.roles.super", "customer"]).unwrap();
        assert_eq!(groups, vec![RoleGroup::Super, RoleGroup::Customer]);

        let err = auth.resolve_names(&["admin", "user.roles.wizard"]).unwrap_err();
        assert!(matches!(err, AuthError::UnknownRoleGroup(ref n) if n == "user.roles.wizard"));
    }

    #[test]
    fn test_metadata() {
        let auth = authorizer();
        let outcome = with_claims(json!({
            format!("{NS}/user_metadata"): {"name": "Ada"},
            format!("{NS}/app_metadata"): "not-an-object",
        }));

        let user = auth.user_metadata(&outcome, false).unwrap();
        assert_eq!(user.get("name"), Some(&json!("Ada")));

        let err = auth.app_metadata(&outcome, false).unwrap_err();
        assert_eq!(err.to_string(), "Missing \"app_metadata\" claim");
        assert!(auth.app_metadata(&outcome, true).unwrap().is_empty());
    }

    #[test]
    fn test_metadata_rejected_outcome() {
        let auth = authorizer();
        let outcome = AuthOutcome::Rejected(AuthFailure::NotAuthenticated);

        assert!(auth.user_metadata(&outcome, true).unwrap().is_empty());
        let err = auth.user_metadata(&outcome, false).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(AuthFailure::NotAuthenticated)));
    }

    #[rstest]
    #[case(json!({"admin": []}))]
    #[case(json!({"admin": [""]}))]
    #[case(json!({"wizard": ["w"]}))]
    fn test_role_groups_rejects_bad_config(#[case] raw: Value) {
        assert!(serde_json::from_value::<RoleGroups>(raw).is_err());
    }

    #[test]
    fn test_role_groups_deserialize() {
        let groups: RoleGroups = serde_json::from_value(json!({"admin": ["boss"], "customer": ["buyer"]})).unwrap();
        assert_eq!(groups.roles(RoleGroup::Admin), Some(&["boss".to_owned()][..]));
        assert!(groups.roles(RoleGroup::Super).is_none());
    }

    proptest! {
        /// Case never affects a match against the lower-case defaults.
        #[test]
        fn claimed_role_case_is_ignored(
            idx in 0usize..3,
            flips in proptest::collection::vec(any::<bool>(), 32),
        ) {
            let role = ["location administrator", "administrator", "admin"][idx];
            let mixed: String = role
                .chars()
                .zip(flips.iter().cycle())
                .map(|(c, &upper)| if upper { c.to_ascii_uppercase() } else { c })
                .collect();
            let outcome = with_roles(&[mixed.as_str()]);
            prop_assert!(authorizer().has_role(&outcome, RoleGroup::Admin, true).unwrap());
        }
    }
}
