//! Hook identifiers
//!
//! Handlers declare their hook as an API version string plus a hook name.
//! The registry stores the parsed form so that lookups can match on group
//! and hook while ignoring version.

use std::fmt;

use crate::RegistryError;

/// API group and version parsed from an `apiVersion` string
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    /// API group (empty for the core group)
    pub group: String,
    /// API version
    pub version: String,
}

impl GroupVersion {
    /// Parse `<group>/<version>` or a bare `<version>`.
    ///
    /// The empty string and a lone `/` parse to the empty GroupVersion. More
    /// than one `/` is rejected.
    pub fn parse(api_version: &str) -> Result<Self, RegistryError> {
        if api_version.is_empty() || api_version == "/" {
            return Ok(Self::default());
        }

        match api_version.split_once('/') {
            None => Ok(Self {
                group: String::new(),
                version: api_version.to_string(),
            }),
            Some((group, version)) if !version.contains('/') => Ok(Self {
                group: group.to_string(),
                version: version.to_string(),
            }),
            Some(_) => Err(RegistryError::InvalidGroupVersion {
                api_version: api_version.to_string(),
            }),
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// A hook within a specific API group and version
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GroupVersionHook {
    /// API group of the hook
    pub group: String,
    /// API version of the hook
    pub version: String,
    /// Hook name
    pub hook: String,
}

impl GroupVersionHook {
    /// Build from a parsed GroupVersion and a hook name
    pub fn new(gv: GroupVersion, hook: impl Into<String>) -> Self {
        Self {
            group: gv.group,
            version: gv.version,
            hook: hook.into(),
        }
    }

    /// Whether this hook belongs to `group` and is named `hook`
    pub fn matches(&self, group: &str, hook: &str) -> bool {
        self.group == group && self.hook == hook
    }
}

impl fmt::Display for GroupVersionHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Hook={}", self.group, self.version, self.hook)
    }
}
