use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

/// Separator between resource and action in a canonical permission name.
pub const PERMISSION_SEPARATOR: char = ':';

fn normalize_segment(kind: &'static str, raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{kind} name cannot be empty")));
    }
    if name.contains(PERMISSION_SEPARATOR) || name.chars().any(char::is_whitespace) {
        return Err(DomainError::invalid_field(kind, name));
    }
    Ok(name.to_uppercase())
}

/// Name of a protectable entity category (e.g. "ROLE", "USER").
///
/// Always stored trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: &str) -> DomainResult<Self> {
        normalize_segment("resource", name).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name of an operation performable on a resource (e.g. "CREATE").
///
/// Always stored trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionName(String);

impl ActionName {
    pub fn new(name: &str) -> DomainResult<Self> {
        normalize_segment("action", name).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_name_conversions {
    ($t:ty) => {
        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

impl_name_conversions!(ResourceName);
impl_name_conversions!(ActionName);

/// A specific (resource, action) pair.
///
/// The canonical name is `"{RESOURCE}:{ACTION}"`; it is the authority string
/// exposed to the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub resource: ResourceName,
    pub action: ActionName,
}

impl ResourcePermission {
    pub fn new(resource: ResourceName, action: ActionName) -> Self {
        Self { resource, action }
    }

    /// Build a permission from raw names, normalizing both.
    pub fn parse_parts(resource: &str, action: &str) -> DomainResult<Self> {
        Ok(Self::new(ResourceName::new(resource)?, ActionName::new(action)?))
    }

    pub fn name(&self) -> String {
        format!("{}{}{}", self.resource, PERMISSION_SEPARATOR, self.action)
    }
}

impl core::fmt::Display for ResourcePermission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{}{}", self.resource, PERMISSION_SEPARATOR, self.action)
    }
}

impl FromStr for ResourcePermission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(PERMISSION_SEPARATOR)
            .ok_or_else(|| DomainError::invalid_field("permission", s))?;
        Self::parse_parts(resource, action)
    }
}

/// Association of a permission to a role with an explicit grant state.
///
/// `granted = false` records an explicit revocation, as opposed to a permission
/// that was never assigned to the role at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role: String,
    pub permission: ResourcePermission,
    pub granted: bool,
}

/// Resolved set of granted actions per resource.
///
/// Keys and actions are held lower-cased, which is also the shape of the
/// `permissions` token claim. Membership tests are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeMap<String, BTreeSet<String>>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: &ResourcePermission) {
        self.insert_raw(permission.resource.as_str(), permission.action.as_str());
    }

    fn insert_raw(&mut self, resource: &str, action: &str) {
        self.0
            .entry(resource.trim().to_lowercase())
            .or_default()
            .insert(action.trim().to_lowercase());
    }

    pub fn contains(&self, resource: &str, action: &str) -> bool {
        self.0
            .get(&resource.trim().to_lowercase())
            .is_some_and(|actions| actions.contains(&action.trim().to_lowercase()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    /// Union another set into this one.
    pub fn extend(&mut self, other: &PermissionSet) {
        for (resource, actions) in &other.0 {
            self.0
                .entry(resource.clone())
                .or_default()
                .extend(actions.iter().cloned());
        }
    }

    pub fn actions_for(&self, resource: &str) -> Option<&BTreeSet<String>> {
        self.0.get(&resource.trim().to_lowercase())
    }

    /// Canonical upper-case authority names (`"RESOURCE:ACTION"`), sorted.
    pub fn authorities(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(resource, actions)| {
                actions.iter().map(move |action| {
                    format!(
                        "{}{}{}",
                        resource.to_uppercase(),
                        PERMISSION_SEPARATOR,
                        action.to_uppercase()
                    )
                })
            })
            .collect()
    }

    /// Claim shape: `{ resource: [action, ...] }` with ordered action lists.
    pub fn to_claim(&self) -> BTreeMap<String, Vec<String>> {
        self.0
            .iter()
            .filter(|(_, actions)| !actions.is_empty())
            .map(|(resource, actions)| (resource.clone(), actions.iter().cloned().collect()))
            .collect()
    }

    pub fn from_claim(claim: &BTreeMap<String, Vec<String>>) -> Self {
        let mut set = Self::new();
        for (resource, actions) in claim {
            for action in actions {
                set.insert_raw(resource, action);
            }
        }
        set
    }
}

impl<'a> FromIterator<&'a ResourcePermission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = &'a ResourcePermission>>(iter: I) -> Self {
        let mut set = Self::new();
        for permission in iter {
            set.insert(permission);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_uppercased() {
        let p = ResourcePermission::parse_parts("  role ", "create").unwrap();
        assert_eq!(p.resource.as_str(), "ROLE");
        assert_eq!(p.action.as_str(), "CREATE");
        assert_eq!(p.name(), "ROLE:CREATE");
        assert_eq!(p.to_string(), "ROLE:CREATE");
    }

    #[test]
    fn empty_or_separator_names_are_rejected() {
        assert!(ResourceName::new("   ").is_err());
        assert!(ActionName::new("a:b").is_err());
        assert!(ResourceName::new("two words").is_err());
    }

    #[test]
    fn canonical_name_parses_back() {
        let p: ResourcePermission = "user:delete".parse().unwrap();
        assert_eq!(p.name(), "USER:DELETE");
        assert!("nodelimiter".parse::<ResourcePermission>().is_err());
    }

    #[test]
    fn permission_set_membership_is_case_insensitive() {
        let read = ResourcePermission::parse_parts("DATA", "READ").unwrap();
        let set: PermissionSet = [&read].into_iter().collect();
        assert!(set.contains("data", "read"));
        assert!(set.contains("DATA", "Read"));
        assert!(!set.contains("DATA", "DELETE"));
        assert!(!set.contains("ROLE", "READ"));
    }

    #[test]
    fn claim_shape_is_lowercase_and_ordered() {
        let mut set = PermissionSet::new();
        set.insert(&ResourcePermission::parse_parts("USER", "UPDATE").unwrap());
        set.insert(&ResourcePermission::parse_parts("USER", "CREATE").unwrap());
        set.insert(&ResourcePermission::parse_parts("ROLE", "READ").unwrap());

        let claim = set.to_claim();
        assert_eq!(claim["user"], vec!["create".to_string(), "update".to_string()]);
        assert_eq!(claim["role"], vec!["read".to_string()]);
        assert_eq!(PermissionSet::from_claim(&claim), set);
        assert_eq!(set.authorities(), vec!["ROLE:READ", "USER:CREATE", "USER:UPDATE"]);
    }

    #[test]
    fn extend_unions_actions() {
        let mut a = PermissionSet::new();
        a.insert(&ResourcePermission::parse_parts("DATA", "READ").unwrap());
        let mut b = PermissionSet::new();
        b.insert(&ResourcePermission::parse_parts("DATA", "UPDATE").unwrap());
        a.extend(&b);
        assert_eq!(a.actions_for("data").map(|s| s.len()), Some(2));
    }
}
