//! Cluster flow control: token service contract and process role.
//!
//! A rule in cluster mode asks a [`TokenService`] for permission instead of
//! reading local counters. Which service answers depends on the process role
//! held by [`ClusterTokenServices`]: a client forwards to a remote token server,
//! an embedded server answers in-process. Transport and server internals live
//! outside this crate.

mod services;
mod token;

pub use services::{ClusterRole, ClusterTokenServices};
pub use token::{TokenResult, TokenResultStatus, TokenService};
