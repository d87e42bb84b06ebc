//! Virtual filesystem paths
//!
//! Maps the client's view of the tree onto a session's root directory.

pub mod validation;

pub use validation::{is_within_root, resolve_virtual_path, virtual_to_real_path};
