//! Core library for the portal.
//!
//! Contains the text cipher and its key files, the document store with its
//! public/secret bucket routing and tag registry, and the access gate that
//! decides whether restricted content may be shown or changed. This crate
//! depends on `portal-storage` for the storage backend trait and knows
//! nothing about HTTP.
//!
//! The gate and the cipher are independent: anyone holding the key files
//! can decrypt restricted documents whether or not the gate is unlocked.

pub mod crypto;
pub mod document;
pub mod error;
pub mod gate;
pub mod keyfile;
pub mod store;
