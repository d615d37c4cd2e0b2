//! keel-manage: creates and deletes catalog services.
//!
//! A create runs the same steps for every catalog service: validate,
//! render the replica configs, persist the service as `Creating`, ensure
//! the container service on the platform, then mark it `Active`. Every
//! step inspects existing state first, so re-running a create that
//! failed halfway resumes it instead of duplicating anything.

pub mod error;
pub mod manager;

pub use error::{ManageError, ManageResult};
pub use manager::{ManagerConfig, ServiceManager};
