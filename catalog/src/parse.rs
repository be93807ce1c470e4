//! Parsers for version notations and TOML catalog files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use toml::Value;

use crate::model::VersionConstraint;

/// Parse the strict notation `strictly!!prefer`. Anything without `!!` is a
/// plain required version.
pub fn parse_strict_notation(notation: &str) -> VersionConstraint {
    match notation.split_once("!!") {
        Some((strictly, prefer)) => VersionConstraint {
            strictly: non_empty(strictly),
            prefer: non_empty(prefer),
            ..VersionConstraint::default()
        },
        None => VersionConstraint {
            require: non_empty(notation),
            ..VersionConstraint::default()
        },
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Version binding of a library entry in a catalog file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryVersion {
    /// `version.ref = "name"`.
    Ref(String),
    Constraint(VersionConstraint),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub group: String,
    pub name: String,
    pub version: LibraryVersion,
}

/// Entries of one catalog TOML file.
#[derive(Debug, Clone, Default)]
pub struct CatalogFile {
    pub versions: Vec<(String, VersionConstraint)>,
    pub libraries: Vec<(String, LibraryEntry)>,
    pub bundles: Vec<(String, Vec<String>)>,
}

pub fn parse_catalog_file(path: &Path) -> Result<CatalogFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read catalog file {}", path.display()))?;
    parse_catalog(&contents).with_context(|| format!("parse catalog file {}", path.display()))
}

pub fn parse_catalog(contents: &str) -> Result<CatalogFile> {
    let table: toml::Table = toml::from_str(contents).context("invalid TOML")?;
    let mut catalog = CatalogFile::default();
    for (key, value) in &table {
        match key.as_str() {
            "versions" => catalog.versions = parse_versions(as_table(value, "versions")?)?,
            "libraries" => catalog.libraries = parse_libraries(as_table(value, "libraries")?)?,
            "bundles" => catalog.bundles = parse_bundles(as_table(value, "bundles")?)?,
            other => bail!(
                "Unknown top-level element '{other}': expected one of 'versions', 'libraries', 'bundles'"
            ),
        }
    }
    Ok(catalog)
}

fn as_table<'a>(value: &'a Value, name: &str) -> Result<&'a toml::Table> {
    value
        .as_table()
        .with_context(|| format!("'{name}' must be a table"))
}

fn as_str(value: &Value, name: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("'{name}' must be a string"))
}

fn parse_versions(table: &toml::Table) -> Result<Vec<(String, VersionConstraint)>> {
    let mut versions = Vec::new();
    for (name, value) in table {
        let constraint = match value {
            Value::String(notation) => parse_strict_notation(notation),
            Value::Table(table) => constraint_from_table(table)
                .with_context(|| format!("version '{name}'"))?,
            _ => bail!("version '{name}' must be a string or a table"),
        };
        versions.push((name.clone(), constraint));
    }
    Ok(versions)
}

fn constraint_from_table(table: &toml::Table) -> Result<VersionConstraint> {
    let mut constraint = VersionConstraint::default();
    for (key, value) in table {
        match key.as_str() {
            "require" => constraint.require = Some(as_str(value, "require")?),
            "strictly" => constraint.strictly = Some(as_str(value, "strictly")?),
            "prefer" => constraint.prefer = Some(as_str(value, "prefer")?),
            "reject" => {
                let rejected = value
                    .as_array()
                    .with_context(|| "'reject' must be an array".to_string())?;
                constraint.reject = rejected
                    .iter()
                    .map(|entry| as_str(entry, "reject entry"))
                    .collect::<Result<_>>()?;
            }
            other => bail!("Unknown version attribute '{other}'"),
        }
    }
    Ok(constraint)
}

fn parse_libraries(table: &toml::Table) -> Result<Vec<(String, LibraryEntry)>> {
    let mut libraries = Vec::new();
    for (alias, value) in table {
        let entry = match value {
            Value::String(notation) => library_from_notation(notation)
                .with_context(|| format!("library '{alias}'"))?,
            Value::Table(table) => {
                library_from_table(table).with_context(|| format!("library '{alias}'"))?
            }
            _ => bail!("library '{alias}' must be a string or a table"),
        };
        libraries.push((alias.clone(), entry));
    }
    Ok(libraries)
}

fn library_from_notation(notation: &str) -> Result<LibraryEntry> {
    let parts: Vec<&str> = notation.split(':').collect();
    let [group, name, version] = parts.as_slice() else {
        bail!(
            "Invalid dependency notation: it must consist of 3 parts separated by colons, eg: my.group:artifact:1.2"
        );
    };
    Ok(LibraryEntry {
        group: group.to_string(),
        name: name.to_string(),
        version: LibraryVersion::Constraint(parse_strict_notation(version)),
    })
}

fn library_from_table(table: &toml::Table) -> Result<LibraryEntry> {
    let mut group = None;
    let mut name = None;
    let mut version = None;
    for (key, value) in table {
        match key.as_str() {
            "module" => {
                let module = as_str(value, "module")?;
                let Some((module_group, module_name)) = module.split_once(':') else {
                    bail!("'module' must use the 'group:name' notation");
                };
                group = Some(module_group.to_string());
                name = Some(module_name.to_string());
            }
            "group" => group = Some(as_str(value, "group")?),
            "name" => name = Some(as_str(value, "name")?),
            "version" => version = Some(library_version(value)?),
            other => bail!("Unknown library attribute '{other}'"),
        }
    }
    Ok(LibraryEntry {
        group: group.context("missing 'group' (or 'module')")?,
        name: name.context("missing 'name' (or 'module')")?,
        version: version.unwrap_or(LibraryVersion::Constraint(VersionConstraint::default())),
    })
}

fn library_version(value: &Value) -> Result<LibraryVersion> {
    match value {
        Value::String(notation) => Ok(LibraryVersion::Constraint(parse_strict_notation(notation))),
        Value::Table(table) => {
            if let Some(reference) = table.get("ref") {
                if table.len() != 1 {
                    bail!("'version.ref' cannot be combined with other version attributes");
                }
                return Ok(LibraryVersion::Ref(as_str(reference, "version.ref")?));
            }
            Ok(LibraryVersion::Constraint(constraint_from_table(table)?))
        }
        _ => bail!("'version' must be a string or a table"),
    }
}

fn parse_bundles(table: &toml::Table) -> Result<Vec<(String, Vec<String>)>> {
    let mut bundles = Vec::new();
    for (name, value) in table {
        let aliases = value
            .as_array()
            .with_context(|| format!("bundle '{name}' must be an array of aliases"))?
            .iter()
            .map(|entry| as_str(entry, "bundle entry"))
            .collect::<Result<Vec<_>>>()?;
        bundles.push((name.clone(), aliases));
    }
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_notations_become_required_versions() {
        assert_eq!(parse_strict_notation("1.7"), VersionConstraint::require("1.7"));
        assert_eq!(parse_strict_notation(""), VersionConstraint::default());
    }

    #[test]
    fn strict_notations_split_into_strictly_and_prefer() {
        let constraint = parse_strict_notation("[1.0,2.0[!!1.5");
        assert_eq!(constraint.strictly.as_deref(), Some("[1.0,2.0["));
        assert_eq!(constraint.prefer.as_deref(), Some("1.5"));
        assert_eq!(constraint.require, None);

        let bare = parse_strict_notation("1.7!!");
        assert_eq!(bare.strictly.as_deref(), Some("1.7"));
        assert_eq!(bare.prefer, None);
    }

    #[test]
    fn catalog_files_parse_all_three_sections() {
        let catalog = parse_catalog(
            r#"
[versions]
groovy = "3.0.5"
checkstyle = { strictly = "[8.0,9.0[", prefer = "8.36" }

[libraries]
groovy-core = { module = "org.codehaus.groovy:groovy", version.ref = "groovy" }
commons = "org.apache.commons:commons-lang3:3.11"
pinned = { group = "org.pinned", name = "pin", version = "1.0" }
unversioned = { module = "org.free:floating" }

[bundles]
groovy = ["groovy-core", "commons"]
"#,
        )
        .expect("parse");

        assert_eq!(catalog.versions.len(), 2);
        assert_eq!(catalog.versions[1].0, "groovy");
        assert_eq!(catalog.versions[1].1, VersionConstraint::require("3.0.5"));

        assert_eq!(catalog.libraries.len(), 4);
        let (_, groovy_core) = catalog
            .libraries
            .iter()
            .find(|(alias, _)| alias == "groovy-core")
            .expect("groovy-core");
        assert_eq!(groovy_core.group, "org.codehaus.groovy");
        assert_eq!(groovy_core.version, LibraryVersion::Ref("groovy".to_string()));
        let (_, unversioned) = catalog
            .libraries
            .iter()
            .find(|(alias, _)| alias == "unversioned")
            .expect("unversioned");
        assert_eq!(
            unversioned.version,
            LibraryVersion::Constraint(VersionConstraint::default())
        );

        assert_eq!(
            catalog.bundles,
            vec![(
                "groovy".to_string(),
                vec!["groovy-core".to_string(), "commons".to_string()]
            )]
        );
    }

    #[test]
    fn unknown_top_level_elements_are_rejected() {
        let err = parse_catalog("[plugins]\nx = \"y\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown top-level element 'plugins'"));
    }

    #[test]
    fn malformed_notations_are_rejected() {
        let err = parse_catalog("[libraries]\nbad = \"just-a-name\"\n").unwrap_err();
        assert!(
            format!("{err:#}").contains("it must consist of 3 parts separated by colons"),
            "unexpected error: {err:#}"
        );
    }
}
