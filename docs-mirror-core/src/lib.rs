#![doc = "docs-mirror-core: reconciliation core for docs-mirror."]

//! This crate holds the reconciliation logic, data models and external contracts for
//! docs-mirror. It keeps `<owner>/<repo>` documentation mirrors in a working tree
//! aligned with their upstream branches, and one remote search store per mirror
//! aligned with the mirror's content.
//!
//! The HTTP index backend lives in the CLI crate; everything here talks to it through
//! [`contract::IndexBackend`].
//!
//! # Usage
//! Build a [`synchronise::RunContext`], pick collaborators, call
//! [`synchronise::synchronise`].

pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod exclusion;
pub mod index;
pub mod janitor;
pub mod migrate;
pub mod mirror;
pub mod planner;
pub mod readme;
pub mod state;
pub mod synchronise;
pub mod tree;
