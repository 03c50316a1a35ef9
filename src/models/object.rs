//! Represents a remote object (file) as reported by a storage listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single object discovered while listing a storage scope.
///
/// This is a transient, statically shaped view over whatever the provider
/// returned. It carries listing metadata only, never payload bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DiscoveredObject {
    /// Storage account (or equivalent top-level identifier).
    pub storage_identifier: String,

    /// Container (bucket) the object lives in.
    pub container: String,

    /// Full path of the object within its container.
    pub path: String,

    /// Size in bytes as reported by the provider.
    pub size: u64,

    /// Provider entity tag, if any.
    pub etag: Option<String>,

    /// Provider last-modified timestamp, if any.
    pub last_modified: Option<DateTime<Utc>>,

    /// Provider creation timestamp, if any.
    pub created_at: Option<DateTime<Utc>>,

    /// Content type (MIME type), if known.
    pub content_type: Option<String>,

    /// Provider-specific attributes (version id, tier, lease state...).
    pub provider_metadata: BTreeMap<String, String>,
}

impl DiscoveredObject {
    /// Last path segment, used as the display name.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercase extension without the dot, or an empty string.
    pub fn extension(&self) -> String {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => String::new(),
        }
    }

    /// Entity tag with surrounding quotes removed.
    pub fn normalized_etag(&self) -> &str {
        self.etag.as_deref().map(|e| e.trim_matches('"')).unwrap_or("")
    }
}

/// One (account, container, folder) triple scanned as a unit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScanScope {
    pub account: String,
    pub container: String,
    /// Folder prefix inside the container; empty means the container root.
    pub folder: String,
}

impl ScanScope {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            folder: folder.into(),
        }
    }
}

#[cfg(test)]
pub(crate) fn object_fixture(path: &str) -> DiscoveredObject {
    DiscoveredObject {
        storage_identifier: "acct".into(),
        container: "raw".into(),
        path: path.into(),
        size: 100,
        etag: Some("\"E1\"".into()),
        last_modified: None,
        created_at: None,
        content_type: Some("text/csv".into()),
        provider_metadata: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_extension_come_from_last_segment() {
        let obj = object_fixture("landing/2025/Accounts.CSV");
        assert_eq!(obj.name(), "Accounts.CSV");
        assert_eq!(obj.extension(), "csv");
    }

    #[test]
    fn dotfiles_and_bare_names_have_no_extension() {
        assert_eq!(object_fixture("a/.hidden").extension(), "");
        assert_eq!(object_fixture("a/README").extension(), "");
    }

    #[test]
    fn etag_quotes_are_stripped() {
        let mut obj = object_fixture("a.csv");
        assert_eq!(obj.normalized_etag(), "E1");
        obj.etag = None;
        assert_eq!(obj.normalized_etag(), "");
    }
}
