//! Where a catalog service is being deployed.

use keel_core::PlatformKind;

/// Cluster-wide inputs shared by every catalog generator.
#[derive(Debug, Clone, Copy)]
pub struct CatalogTarget<'a> {
    pub platform: PlatformKind,
    pub region: &'a str,
    pub cluster: &'a str,
    /// DNS domain the members register under.
    pub domain: &'a str,
    pub zones: &'a [String],
}
