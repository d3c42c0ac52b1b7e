//! Data models exchanged between the storage engine and the HTTP layer.
//!
//! Objects carry no persisted metadata of their own; [`object::ObjectMetadata`]
//! is derived from the filesystem each time it is requested.

pub mod object;
