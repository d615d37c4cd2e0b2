//! keel-state: the control database of a Keel cluster.
//!
//! Backed by [redb](https://docs.rs/redb). Stores every catalog service's
//! `ServiceAttr` together with the replica configs rendered for it at
//! creation time.
//!
//! # Architecture
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns.
//! Service attributes are keyed by `{cluster}/{service}`; replica configs
//! by `{service_uuid}:{index:06}` so a prefix scan returns them in
//! ordinal order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
