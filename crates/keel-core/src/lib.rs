//! keel-core: types shared by every Keel crate.
//!
//! Holds the service data model (attributes, replica configs, resources),
//! the naming rules that give each replica a stable identity and DNS
//! name, the container platform selector, and the `keel.toml` parser.

pub mod config;
pub mod naming;
pub mod platform;
pub mod types;

pub use config::KeelConfig;
pub use platform::{PlatformKind, UnknownPlatform};
pub use types::*;
