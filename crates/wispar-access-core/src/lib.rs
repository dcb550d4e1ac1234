//! Core traits and types for the Wispar scoped file-access broker.
//!
//! This crate defines the abstractions shared between the platform implementations:
//! - `FolderPicker`: Native folder selection (the picker adapter)
//! - `AccessModel`: Token minting/resolution plus scoped access start/stop
//! - `ScopedResource`: The platform arbiter that actually grants access to a path
//! - Bridge wire types: `MethodCall`, `BridgeMethod`, `BridgeReply`

mod access;
mod bridge;
mod error;
mod picker;
mod types;

pub use access::{AccessModel, ScopedResource};
pub use bridge::{BoundaryMode, BridgeMethod, BridgeReply, BridgeValue, ErrorPayload, MethodCall};
pub use error::{AccessError, ErrorKind};
pub use picker::FolderPicker;
pub use types::{
    AccessModelKind, AccessState, ContentKind, PersistentToken, PickPurpose, RawSelection,
    ResolvedPath, SelectionRequest,
};
