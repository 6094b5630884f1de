//! # Installing, launching and supervising Minecraft
//!
//! This crate turns a version id into a verified on-disk installation and
//! a running, monitored game process:
//!
//! - [`download`]: the acquisition engine. Version document, client jar,
//!   libraries, native extraction, asset validation and repair. Idempotent;
//!   a second run with an intact store performs zero network requests.
//! - [`launch`]: argument composition (memory auto-tune, GC selection,
//!   classpath) and the process supervisor (launch-step detection,
//!   heartbeat, graceful-then-forceful stop, crash classification).
//! - [`instance`]: the persisted per-instance metadata documents.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod download;
pub mod instance;
pub mod launch;

pub use download::{ensure_version, GameDownloadError, GameDownloader};
pub use instance::{list_instances, Instance, Modloader};
pub use launch::supervisor::{GameStatus, Supervisor};
pub use launch::{LaunchError, LaunchOptions};
