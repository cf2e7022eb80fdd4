//! Builds the download URL that keys the cache for a run.

use std::fmt;

use color_eyre::eyre::eyre;

use crate::error::{ConfigError, ConfigResult};
use crate::options::BuildOptions;

const ARCHIVE_TEMPLATE: &str =
    "{name}-v{version}-{runtime}-v{abi}-{platform}{libc}-{arch}.tar.gz";

/// Fully expanded URL of a prebuilt archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadUrl(String);

impl DownloadUrl {
    /// Expands the configured template for `options` targeting `abi`.
    ///
    /// Template precedence: an explicit `download` template, then a host
    /// mirror, then the package's GitHub release layout.
    ///
    /// # Errors
    ///
    /// Returns an error when no template applies because the package has no
    /// repository and no override is configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use prebuild_fetch::{BuildOptions, DownloadUrl, PackageInfo, Platform};
    ///
    /// let mut options = BuildOptions::new(
    ///     PackageInfo::new("leveldown", "5.6.0").with_repository("Level/leveldown"),
    /// );
    /// options.platform = Platform { os: "linux".into(), arch: "x64".into(), libc: String::new() };
    /// let url = DownloadUrl::resolve(&options, 93)?;
    /// assert_eq!(
    ///     url.as_str(),
    ///     "https://github.com/Level/leveldown/releases/download/v5.6.0/leveldown-v5.6.0-node-v93-linux-x64.tar.gz"
    /// );
    /// # Ok::<(), prebuild_fetch::ConfigError>(())
    /// ```
    pub fn resolve(options: &BuildOptions, abi: u32) -> ConfigResult<Self> {
        let template = url_template(options)?;
        Ok(Self(expand_template(&template, &placeholders(options, abi))))
    }

    /// Wraps an already expanded URL.
    #[must_use]
    pub fn from_raw(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Returns the URL text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the last path segment, ignoring any query or fragment.
    #[must_use]
    pub fn basename(&self) -> &str {
        let path = self.0.split(['?', '#']).next().unwrap_or(&self.0);
        path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
    }
}

impl fmt::Display for DownloadUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn url_template(options: &BuildOptions) -> ConfigResult<String> {
    if let Some(download) = options.url.download.as_deref().filter(|t| !t.trim().is_empty()) {
        return Ok(download.to_owned());
    }

    if let Some(mirror) = options.url.host_mirror.as_deref().filter(|m| !m.trim().is_empty()) {
        let base = mirror.trim_end_matches('/');
        return Ok(format!("{base}/{{tag_prefix}}{{version}}/{ARCHIVE_TEMPLATE}"));
    }

    let host = options.package.repository_url().ok_or_else(|| {
        ConfigError::from(eyre!(
            "package {} has no repository; configure a download template or host mirror",
            options.package.name
        ))
    })?;
    Ok(format!(
        "{host}/releases/download/{{tag_prefix}}{{version}}/{ARCHIVE_TEMPLATE}"
    ))
}

fn placeholders(options: &BuildOptions, abi: u32) -> Vec<(&'static str, String)> {
    let package = &options.package;
    let version = semver::Version::parse(&package.version).ok();
    let part = |f: fn(&semver::Version) -> String| version.as_ref().map(f).unwrap_or_default();
    let name = package.unscoped_name().to_owned();

    vec![
        ("name", name.clone()),
        ("package_name", name),
        ("version", package.version.clone()),
        ("major", part(|v| v.major.to_string())),
        ("minor", part(|v| v.minor.to_string())),
        ("patch", part(|v| v.patch.to_string())),
        ("prerelease", part(|v| v.pre.to_string())),
        ("build", part(|v| v.build.to_string())),
        ("abi", abi.to_string()),
        ("runtime", options.runtime.as_str().to_owned()),
        ("platform", options.platform.os.clone()),
        ("arch", options.platform.arch.clone()),
        ("libc", options.platform.libc.clone()),
        (
            "configuration",
            if options.url.debug { "Debug" } else { "Release" }.to_owned(),
        ),
        ("tag_prefix", options.url.tag_prefix.clone()),
    ]
}

/// Replaces `{key}` placeholders; unknown keys are left untouched.
fn expand_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let (before, from_open) = rest.split_at(open);
        out.push_str(before);
        let Some(close) = from_open.find('}') else {
            rest = from_open;
            break;
        };
        let (token, after) = from_open.split_at(close + 1);
        let key = token.trim_start_matches('{').trim_end_matches('}');
        match values.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(token),
        }
        rest = after;
    }
    out.push_str(rest);
    out
}
