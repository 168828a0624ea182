//! # rampart-cli
//!
//! Library half of the administration CLI: the control-socket client and
//! the command implementations. The `rampart` binary is a thin clap
//! wrapper over these.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod commands;
