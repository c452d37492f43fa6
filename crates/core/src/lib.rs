//! Core types for cabinetdb
//!
//! This crate defines the shared vocabulary of the store:
//! - [`Value`]: the canonical value model for objects and metadata
//! - [`CollectionKey`]: the `(collection, key)` pair addressing every entity
//! - [`Error`] / [`Result`]: the error taxonomy used by all crates
//! - [`ValueCodec`]: the pluggable serializer seam
//!
//! No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod types;
pub mod value;

pub use codec::{MsgpackCodec, ValueCodec};
pub use error::{Error, Result};
pub use types::{CollectionKey, Snapshot};
pub use value::Value;
