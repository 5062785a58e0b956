use thiserror::Error;

use crate::PACKAGE_EXTENSION;

/// Reasons a client supplied filename cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileNameError {
    /// Nothing usable was left after sanitizing.
    #[error("invalid package filename: {0:?}")]
    Empty(String),

    /// The sanitized name does not end in `.apk`.
    #[error("unsupported file {0:?}: only .{ext} packages are accepted", ext = PACKAGE_EXTENSION)]
    NotAPackage(String),
}

/// A package filename that is safe to join onto a partition directory.
///
/// Built from whatever name the client sent: path separators become
/// underscores, anything outside `[A-Za-z0-9._-]` is dropped and leading or
/// trailing dots and underscores are stripped, so the result can never name a
/// parent directory or an absolute path.
///
/// # Example
///
/// ```
/// use apkrepo_schema::PackageFileName;
///
/// let name = PackageFileName::sanitize("../../etc/curl-8.5.0-r0.apk").unwrap();
/// assert_eq!(name.as_str(), "etc_curl-8.5.0-r0.apk");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageFileName(String);

impl PackageFileName {
    /// Sanitize `raw` and require the package extension.
    ///
    /// # Errors
    ///
    /// Returns [`FileNameError::Empty`] if nothing survives sanitizing and
    /// [`FileNameError::NotAPackage`] if the result is not an `.apk` file.
    pub fn sanitize(raw: &str) -> Result<Self, FileNameError> {
        let spaced: String = raw
            .chars()
            .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
            .collect();

        let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
        let kept: String = joined
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        let name = kept.trim_matches(|c| c == '.' || c == '_');

        if name.is_empty() {
            return Err(FileNameError::Empty(raw.to_string()));
        }
        if !is_package_file(name) {
            return Err(FileNameError::NotAPackage(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// Return the sanitized name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageFileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<std::path::Path> for PackageFileName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// Whether `name` carries the package extension (case-insensitive).
pub fn is_package_file(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(PACKAGE_EXTENSION))
}
