//! Reads the consuming package's identity from `package.json`.

use camino::Utf8Path;
use color_eyre::eyre::{Context, eyre};
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Name, version, and source repository of the package whose binary is
/// being fetched.
///
/// # Examples
///
/// ```
/// use prebuild_fetch::PackageInfo;
///
/// let package = PackageInfo::new("@scope/leveldown", "5.6.0")
///     .with_repository("git+https://github.com/Level/leveldown.git");
/// assert_eq!(package.unscoped_name(), "leveldown");
/// assert_eq!(
///     package.repository_url().as_deref(),
///     Some("https://github.com/Level/leveldown")
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageInfo {
    /// Package name, possibly scoped (`@scope/name`).
    pub name: String,
    /// Published version string.
    pub version: String,
    /// Repository reference as written in the manifest.
    #[serde(default, deserialize_with = "repository_field")]
    pub repository: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RepositoryField {
    Url(String),
    Detailed { url: String },
}

fn repository_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let field = Option::<RepositoryField>::deserialize(deserializer)?;
    Ok(field.map(|value| match value {
        RepositoryField::Url(url) | RepositoryField::Detailed { url } => url,
    }))
}

impl PackageInfo {
    /// Creates package info without a repository.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            repository: None,
        }
    }

    /// Sets the repository reference.
    #[must_use]
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Reads `name`, `version`, and `repository` from a `package.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, is not valid JSON, or
    /// lacks a name or version.
    pub fn from_manifest(path: &Utf8Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read package manifest {path}"))?;
        Self::from_json(&raw).map_err(|err| ConfigError::from(eyre!("{path}: {err}")))
    }

    /// Parses package info from `package.json` contents.
    ///
    /// # Errors
    ///
    /// Returns an error when the JSON is malformed or lacks a name or version.
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let package: Self =
            serde_json::from_str(raw).context("package manifest is not valid JSON")?;
        if package.name.trim().is_empty() || package.version.trim().is_empty() {
            return Err(ConfigError::from(eyre!(
                "package manifest must declare a name and a version"
            )));
        }
        Ok(package)
    }

    /// Returns the package name with any npm scope removed.
    #[must_use]
    pub fn unscoped_name(&self) -> &str {
        match self.name.strip_prefix('@') {
            Some(scoped) => scoped.split_once('/').map_or(self.name.as_str(), |(_, name)| name),
            None => &self.name,
        }
    }

    /// Normalises the repository reference to an `https://` URL without a
    /// trailing `.git`.
    ///
    /// Accepts `git+https://`, `git://`, `git@github.com:` and `github:` forms
    /// as well as the `owner/repo` shorthand.
    #[must_use]
    pub fn repository_url(&self) -> Option<String> {
        let raw = self.repository.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        let url = if let Some(rest) = raw.strip_prefix("git+") {
            rest.to_owned()
        } else if let Some(rest) = raw.strip_prefix("git://") {
            format!("https://{rest}")
        } else if let Some(rest) = raw.strip_prefix("git@github.com:") {
            format!("https://github.com/{rest}")
        } else if let Some(rest) = raw.strip_prefix("github:") {
            format!("https://github.com/{rest}")
        } else if !raw.contains("://") && raw.matches('/').count() == 1 {
            format!("https://github.com/{raw}")
        } else {
            raw.to_owned()
        };

        let without_git = url.strip_suffix(".git").unwrap_or(&url);
        Some(without_git.trim_end_matches('/').to_owned())
    }
}
