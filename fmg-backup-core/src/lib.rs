#![doc = "fmg-backup-core: traversal and synchronisation engine for fmg-backup."]

//! This crate contains the whole backup engine: the controller client, the hierarchy
//! walker, revision selection, atomic artifact storage and the run coordinator.
//! Configuration loading from files and the command line live in the `fmg-backup` binary.
//!
//! # Usage
//! Build a [`config::SyncConfig`], a [`controller::FortiManagerClient`] and a
//! [`store::FsArtifactStore`], then call [`synchronise::synchronise`].

pub mod config;
pub mod contract;
pub mod controller;
pub mod error;
pub mod rpc;
pub mod selector;
pub mod store;
pub mod summary;
pub mod synchronise;
pub mod walker;
