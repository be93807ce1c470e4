//! Mutable builder assembling a validated version catalog.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use tracing::warn;

use crate::model::{BundleModel, DependencyModel, VersionCatalog, VersionConstraint, VersionModel};
use crate::parse::{LibraryVersion, parse_catalog_file, parse_strict_notation};

const ALIAS_REGEX: &str = "[a-z]([a-zA-Z0-9_.\\-])+";

static ALIAS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{ALIAS_REGEX}$")).unwrap());

const FORBIDDEN_ALIAS_SUFFIXES: [&str; 4] = ["bundles", "versions", "version", "bundle"];

/// A declared library: fully bound, or referencing a version by name until
/// build time.
#[derive(Debug, Clone)]
enum PendingLibrary {
    Bound(DependencyModel),
    VersionRef {
        group: String,
        name: String,
        version_ref: String,
        context: Option<String>,
    },
}

impl PendingLibrary {
    fn realize(&self, versions: &BTreeMap<String, VersionModel>) -> Result<DependencyModel> {
        match self {
            PendingLibrary::Bound(model) => Ok(model.clone()),
            PendingLibrary::VersionRef {
                group,
                name,
                version_ref,
                context,
            } => {
                let model = versions.get(version_ref).ok_or_else(|| {
                    anyhow!("Referenced version '{version_ref}' doesn't exist on dependency {group}:{name}")
                })?;
                Ok(DependencyModel {
                    group: group.clone(),
                    name: name.clone(),
                    version_ref: Some(version_ref.clone()),
                    version: model.version.clone(),
                    context: context.clone(),
                })
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            PendingLibrary::Bound(model) => model.to_string(),
            PendingLibrary::VersionRef {
                group,
                name,
                version_ref,
                ..
            } => format!("{group}:{name} (version ref '{version_ref}')"),
        }
    }
}

/// Builder for one named catalog.
#[derive(Debug)]
pub struct VersionCatalogBuilder {
    name: String,
    description: Option<String>,
    versions: BTreeMap<String, VersionModel>,
    libraries: BTreeMap<String, PendingLibrary>,
    bundles: BTreeMap<String, BundleModel>,
    import: Option<PathBuf>,
    current_context: Option<String>,
}

impl VersionCatalogBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            versions: BTreeMap::new(),
            libraries: BTreeMap::new(),
            bundles: BTreeMap::new(),
            import: None,
            current_context: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = Some(description.to_string());
    }

    /// Declare a version constraint. The first binding wins so that
    /// whatever a platform declares can be overridden beforehand.
    pub fn version(&mut self, name: &str, constraint: VersionConstraint) -> Result<String> {
        validate_name("name", name)?;
        if !self.versions.contains_key(name) {
            self.versions.insert(
                name.to_string(),
                VersionModel {
                    version: constraint,
                    context: self.current_context.clone(),
                },
            );
        }
        Ok(name.to_string())
    }

    /// Declare a version from its string notation.
    pub fn version_str(&mut self, name: &str, notation: &str) -> Result<String> {
        self.version(name, parse_strict_notation(notation))
    }

    /// Start declaring a library alias.
    pub fn alias(&mut self, alias: &str) -> Result<AliasBuilder<'_>> {
        validate_name("alias", alias)?;
        Ok(AliasBuilder {
            owner: self,
            alias: alias.to_string(),
        })
    }

    /// Declare a bundle of library aliases. Aliases are validated when the
    /// catalog is built.
    pub fn bundle(&mut self, name: &str, aliases: Vec<String>) -> Result<()> {
        validate_name("bundle", name)?;
        let model = BundleModel {
            components: aliases,
            context: self.current_context.clone(),
        };
        if let Some(previous) = self.bundles.insert(name.to_string(), model.clone()) {
            warn!(
                bundle = name,
                previous = ?previous.components,
                replaced_with = ?model.components,
                "duplicate entry for bundle"
            );
        }
        Ok(())
    }

    pub fn contains_library_alias(&self, alias: &str) -> bool {
        self.libraries.contains_key(alias)
    }

    /// Import a catalog file when the catalog is built. Only a single
    /// external catalog may be imported per catalog definition.
    pub fn from_file(&mut self, path: &Path) -> Result<()> {
        if self.import.is_some() {
            bail!("You can only import a single external catalog in a given catalog definition.");
        }
        self.import = Some(path.to_path_buf());
        Ok(())
    }

    /// Build the catalog: import, realize version references, validate
    /// bundles, and assemble the immutable model.
    pub fn build(mut self) -> Result<VersionCatalog> {
        if let Some(path) = self.import.take() {
            self.import_catalog_from_file(&path)?;
        }
        let mut libraries = BTreeMap::new();
        for (alias, pending) in &self.libraries {
            libraries.insert(alias.clone(), pending.realize(&self.versions)?);
        }
        for (bundle_name, bundle) in &self.bundles {
            for alias in &bundle.components {
                if !self.libraries.contains_key(alias) {
                    bail!(
                        "A bundle with name '{bundle_name}' declares a dependency on '{alias}' which doesn't exist"
                    );
                }
            }
        }
        Ok(VersionCatalog {
            description: self.description.unwrap_or_else(|| {
                format!(
                    "A catalog of dependencies accessible via the `{}` extension.",
                    self.name
                )
            }),
            name: self.name,
            libraries,
            bundles: self.bundles,
            versions: self.versions,
        })
    }

    fn import_catalog_from_file(&mut self, path: &Path) -> Result<()> {
        let is_toml = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("toml"));
        if !is_toml {
            bail!("Unsupported file format: please use a TOML file");
        }
        if !path.exists() {
            bail!("Catalog file {} doesn't exist", path.display());
        }
        let file = parse_catalog_file(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.with_context(format!("catalog {file_name}"), |builder| {
            for (name, constraint) in file.versions {
                builder.version(&name, constraint)?;
            }
            for (alias, entry) in file.libraries {
                let target = builder.alias(&alias)?.to(&entry.group, &entry.name);
                match entry.version {
                    LibraryVersion::Ref(reference) => target.version_ref(&reference),
                    LibraryVersion::Constraint(constraint) => target.version(constraint),
                }
            }
            for (name, aliases) in file.bundles {
                builder.bundle(&name, aliases)?;
            }
            Ok(())
        })
    }

    fn with_context<R>(
        &mut self,
        context: String,
        action: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let previous = self.current_context.replace(context);
        let result = action(self);
        self.current_context = previous;
        result
    }

    fn insert_library(&mut self, alias: String, pending: PendingLibrary) {
        let bound = pending.describe();
        if let Some(previous) = self.libraries.insert(alias.clone(), pending) {
            warn!(
                alias = %alias,
                previous = %previous.describe(),
                replaced_with = %bound,
                "duplicate entry for alias"
            );
        }
    }
}

/// First stage of an alias declaration: the coordinates.
#[derive(Debug)]
pub struct AliasBuilder<'a> {
    owner: &'a mut VersionCatalogBuilder,
    alias: String,
}

impl<'a> AliasBuilder<'a> {
    /// Bind via `group:artifact:version` notation.
    pub fn to_notation(self, coordinates: &str) -> Result<()> {
        let parts: Vec<&str> = coordinates.split(':').collect();
        let [group, name, version] = parts.as_slice() else {
            bail!(
                "Invalid dependency notation: it must consist of 3 parts separated by colons, eg: my.group:artifact:1.2"
            );
        };
        self.to(group, name).version_str(version);
        Ok(())
    }

    pub fn to(self, group: &str, name: &str) -> LibraryAliasBuilder<'a> {
        LibraryAliasBuilder {
            owner: self.owner,
            alias: self.alias,
            group: group.to_string(),
            name: name.to_string(),
        }
    }
}

/// Second stage of an alias declaration: the version binding.
pub struct LibraryAliasBuilder<'a> {
    owner: &'a mut VersionCatalogBuilder,
    alias: String,
    group: String,
    name: String,
}

impl LibraryAliasBuilder<'_> {
    pub fn version(self, constraint: VersionConstraint) {
        let model = DependencyModel {
            group: self.group,
            name: self.name,
            version_ref: None,
            version: constraint,
            context: self.owner.current_context.clone(),
        };
        self.owner
            .insert_library(self.alias, PendingLibrary::Bound(model));
    }

    pub fn version_str(self, notation: &str) {
        self.version(parse_strict_notation(notation));
    }

    /// Bind to a named version declaration, resolved when the catalog is
    /// built.
    pub fn version_ref(self, version_ref: &str) {
        let pending = PendingLibrary::VersionRef {
            group: self.group,
            name: self.name,
            version_ref: version_ref.to_string(),
            context: self.owner.current_context.clone(),
        };
        self.owner.insert_library(self.alias, pending);
    }

    pub fn without_version(self) {
        self.version(VersionConstraint::default());
    }
}

fn validate_name(kind: &str, value: &str) -> Result<()> {
    if !ALIAS_PATTERN.is_match(value) {
        bail!(
            "Invalid {kind} name '{value}': it must match the following regular expression: {ALIAS_REGEX}"
        );
    }
    if kind == "alias" {
        validate_alias(value)?;
    }
    Ok(())
}

fn validate_alias(alias: &str) -> Result<()> {
    let lowercase = alias.to_lowercase();
    for suffix in FORBIDDEN_ALIAS_SUFFIXES {
        if lowercase.ends_with(suffix) {
            bail!("Invalid alias name '{alias}': it must not end with '{suffix}'");
        }
    }
    Ok(())
}
