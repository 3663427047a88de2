use crate::error::{Error, Result};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const GROUP_SEPARATOR: char = ',';
const TOKEN_SEPARATOR: &str = "&&";

/// Permission name granted by a role.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Permission(String);

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Permission {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <String as serde::Deserialize>::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

impl Permission {
    /// Creates a permission, trimming surrounding whitespace.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPermission(
                "permission must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Creates a permission from a trusted string without validation.
    pub fn from_string(value: String) -> Self {
        Self(value)
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Permission {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Permission {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Permission {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

/// Parsed permission expression: a disjunction of conjunction groups.
///
/// The textual form separates groups with `,` and the permissions inside a
/// group with `&&`, so `"read, write && publish"` is satisfied by `read`
/// alone or by `write` together with `publish`. Tokens are trimmed, empty
/// tokens and empty groups are dropped, and an expression left with no
/// group is rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PermissionExpr {
    groups: Vec<Vec<Permission>>,
}

impl PermissionExpr {
    /// Parses the textual form.
    pub fn parse(value: &str) -> Result<Self> {
        Self::from_alternatives(value.split(GROUP_SEPARATOR))
    }

    /// Builds an expression from alternatives, each split on `&&`.
    pub fn from_alternatives<I, S>(alternatives: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = alternatives
            .into_iter()
            .map(|alternative| {
                alternative
                    .as_ref()
                    .split(TOKEN_SEPARATOR)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        Self::from_groups(groups)
    }

    /// Builds an expression from pre-structured groups of tokens.
    pub fn from_groups<I, G, S>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups: Vec<Vec<Permission>> = groups
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .filter_map(|token| Permission::new(token).ok())
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();

        if groups.is_empty() {
            return Err(Error::InvalidPermission(
                "permission expression must contain at least one permission".to_string(),
            ));
        }
        Ok(Self { groups })
    }

    /// Returns the conjunction groups.
    pub fn groups(&self) -> &[Vec<Permission>] {
        &self.groups
    }

    /// Iterates over every distinct permission named in the expression.
    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        let mut seen = std::collections::HashSet::new();
        self.groups
            .iter()
            .flatten()
            .filter(move |permission| seen.insert(*permission))
    }
}

impl fmt::Display for PermissionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, group) in self.groups.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            for (position, permission) in group.iter().enumerate() {
                if position > 0 {
                    f.write_str(" && ")?;
                }
                f.write_str(permission.as_str())?;
            }
        }
        Ok(())
    }
}

impl FromStr for PermissionExpr {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for PermissionExpr {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

/// Conversion into a [`PermissionExpr`], accepted by
/// [`Checker::check`](crate::Checker::check).
///
/// Strings use the textual form. Flat lists treat every entry as one
/// alternative split on `&&`; nested lists are taken as groups verbatim.
pub trait IntoPermissionExpr {
    /// Performs the conversion.
    fn into_permission_expr(self) -> Result<PermissionExpr>;
}

impl IntoPermissionExpr for PermissionExpr {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        Ok(self)
    }
}

impl IntoPermissionExpr for &PermissionExpr {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        Ok(self.clone())
    }
}

impl IntoPermissionExpr for &str {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::parse(self)
    }
}

impl IntoPermissionExpr for String {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::parse(&self)
    }
}

impl IntoPermissionExpr for &String {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::parse(self)
    }
}

impl IntoPermissionExpr for &[&str] {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_alternatives(self)
    }
}

impl<const N: usize> IntoPermissionExpr for [&str; N] {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_alternatives(self)
    }
}

impl IntoPermissionExpr for Vec<&str> {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_alternatives(self)
    }
}

impl IntoPermissionExpr for Vec<String> {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_alternatives(self)
    }
}

impl IntoPermissionExpr for Vec<Vec<&str>> {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_groups(self)
    }
}

impl IntoPermissionExpr for &[Vec<&str>] {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_groups(self.iter().map(|group| group.iter()))
    }
}

impl IntoPermissionExpr for Vec<Vec<String>> {
    fn into_permission_expr(self) -> Result<PermissionExpr> {
        PermissionExpr::from_groups(self)
    }
}

/// Evaluates `expr` against a permission -> priority table.
///
/// A group is satisfied when every permission is present; its priority is the
/// worst (largest) priority among them. The result is the best (smallest)
/// priority over satisfied groups, or `None` when no group is satisfied.
pub(crate) fn best_priority(
    expr: &PermissionExpr,
    granted: &HashMap<Permission, u32>,
) -> Option<u32> {
    expr.groups
        .iter()
        .filter_map(|group| {
            group.iter().try_fold(0u32, |worst, permission| {
                granted
                    .get(permission)
                    .map(|priority| worst.max(*priority))
            })
        })
        .min()
}
