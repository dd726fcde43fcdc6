#![cfg_attr(docsrs, feature(doc_cfg))]
//! # redodobms_lib
//!
//! This crate decodes the Bluetooth LE telemetry frames of Redodo (and LiTime)
//! battery management systems and builds the commands that switch their
//! discharge relay.
//!
//! The byte level part is synchronous and free of I/O: [`protocol::validate`]
//! checks a received buffer, a [`bms::BmsProtocol`] variant such as
//! [`redodo::Redodo`] decodes it into a [`sample::Sample`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies` and `tokio-session`.
//! - `tokio-session`: Enables the **asynchronous** device session using `tokio`.
//! - `serde`: Enables `serde` support for samples and the session configuration.
//! - `bin-dependencies`: Enables all features required by the `redodobms` binary executable.

/// Contains error types for the library.
mod error;
/// Frame format, checksum and commands.
pub mod protocol;

pub mod bms;
pub mod redodo;
pub mod sample;

pub use error::Error;

/// Asynchronous device session.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-session")))]
#[cfg(feature = "tokio-session")]
pub mod session;
