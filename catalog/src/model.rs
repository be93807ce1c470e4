//! Built version-catalog model.
//!
//! These types are the immutable output of a builder; entries are kept in
//! deterministic (sorted) order.

use std::collections::BTreeMap;
use std::fmt;

/// Rich version constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionConstraint {
    pub require: Option<String>,
    pub strictly: Option<String>,
    pub prefer: Option<String>,
    pub reject: Vec<String>,
}

impl VersionConstraint {
    pub fn require(version: &str) -> Self {
        Self {
            require: Some(version.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.require.is_none()
            && self.strictly.is_none()
            && self.prefer.is_none()
            && self.reject.is_empty()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(strictly) = &self.strictly {
            parts.push(format!("strictly {strictly}"));
        }
        if let Some(require) = &self.require {
            parts.push(format!("require {require}"));
        }
        if let Some(prefer) = &self.prefer {
            parts.push(format!("prefer {prefer}"));
        }
        if !self.reject.is_empty() {
            parts.push(format!("reject {}", self.reject.join(" & ")));
        }
        if parts.is_empty() {
            Ok(())
        } else {
            write!(f, "{{{}}}", parts.join("; "))
        }
    }
}

/// A named version declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionModel {
    pub version: VersionConstraint,
    /// Where the declaration came from, e.g. `catalog libs.versions.toml`.
    pub context: Option<String>,
}

/// A library alias bound to coordinates and a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyModel {
    pub group: String,
    pub name: String,
    /// Name of the referenced version declaration, when bound by reference.
    pub version_ref: Option<String>,
    pub version: VersionConstraint,
    pub context: Option<String>,
}

impl fmt::Display for DependencyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}

/// A named list of library aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleModel {
    pub components: Vec<String>,
    pub context: Option<String>,
}

/// Assembled catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCatalog {
    pub name: String,
    pub description: String,
    pub libraries: BTreeMap<String, DependencyModel>,
    pub bundles: BTreeMap<String, BundleModel>,
    pub versions: BTreeMap<String, VersionModel>,
}

impl VersionCatalog {
    pub fn library(&self, alias: &str) -> Option<&DependencyModel> {
        self.libraries.get(alias)
    }

    pub fn bundle(&self, name: &str) -> Option<&BundleModel> {
        self.bundles.get(name)
    }

    pub fn version(&self, name: &str) -> Option<&VersionModel> {
        self.versions.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_rendering_names_each_part() {
        let constraint = VersionConstraint {
            require: None,
            strictly: Some("[1.0,2.0[".to_string()),
            prefer: Some("1.5".to_string()),
            reject: vec!["1.4".to_string()],
        };
        assert_eq!(
            constraint.to_string(),
            "{strictly [1.0,2.0[; prefer 1.5; reject 1.4}"
        );
        assert_eq!(VersionConstraint::default().to_string(), "");
    }

    #[test]
    fn dependency_rendering_elides_empty_versions() {
        let bound = DependencyModel {
            group: "org.example".to_string(),
            name: "lib".to_string(),
            version_ref: None,
            version: VersionConstraint::require("1.2"),
            context: None,
        };
        assert_eq!(bound.to_string(), "org.example:lib:{require 1.2}");

        let unversioned = DependencyModel {
            version: VersionConstraint::default(),
            ..bound
        };
        assert_eq!(unversioned.to_string(), "org.example:lib");
    }
}
