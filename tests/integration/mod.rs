//! Integration tests for warden supervision
//!
//! These tests launch real watcher processes from the built `warden` binary
//! and drive them through a supervisor, so they run serially.

pub mod failure;
pub mod helpers;
pub mod lifecycle;
pub mod reattach;
pub mod recovery;
