// # Binding Source Trait
//
// Defines the interface for reading the desired host bindings from the
// external host configuration.
//
// ## Implementations
//
// - OPNsense `config.xml`: `leasesync-opnsense` crate
//
// ## Usage
//
// ```rust,ignore
// use leasesync_core::BindingSource;
//
// let bindings = source.fetch().await?;
// let marker = source.revision().await?;
// ```

use async_trait::async_trait;
use std::time::SystemTime;

use crate::binding::Binding;

/// Opaque modification marker of the host configuration
///
/// Two revisions compare equal when the underlying resource did not change
/// between the two samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// Revision derived from a file modification time
    pub fn from_modified(modified: SystemTime) -> Self {
        let nanos = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self(format!("mtime:{nanos}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trait for host configuration readers
///
/// Sources are thin I/O wrappers: they parse the configuration into
/// bindings and report a modification marker. They never look at the cache
/// or decide what to update.
#[async_trait]
pub trait BindingSource: Send + Sync {
    /// Read the current bindings
    ///
    /// Duplicate keys are allowed here; the engine rejects them when it
    /// validates the set.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Binding>)`: The declared bindings
    /// - `Err(Error::ConfigParse)`: A contradictory or malformed entry
    /// - `Err(Error::Source)`: The configuration could not be read
    async fn fetch(&self) -> Result<Vec<Binding>, crate::Error>;

    /// Sample the modification marker of the configuration
    ///
    /// `Ok(None)` means the source has no notion of revisions; polling then
    /// never detects a change on its own.
    async fn revision(&self) -> Result<Option<Revision>, crate::Error>;

    /// Source name (for logging)
    fn source_name(&self) -> &'static str;
}
