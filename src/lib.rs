//! # Recipe Press
//!
//! A build orchestrator for e-book news recipes. Each configured publication
//! is converted by an external e-book tool, stamped with its publish date,
//! optionally given a plain text cover, fanned out into extra formats and
//! finally listed in a static download index.
//!
//! ## Architecture
//!
//! The build is a sequential pipeline, one recipe at a time:
//! 1. **Registry**: load the ordered recipe table ([`registry`])
//! 2. **Scheduling**: decide whether a recipe runs live or reuses the cache ([`schedule`], [`cache`])
//! 3. **Conversion**: run the external converter with a timeout ([`invoker`])
//! 4. **Resolution**: find the produced file and read its metadata ([`resolver`])
//! 5. **Cover**: optionally render and attach a text-only cover ([`cover`])
//! 6. **Fan-out**: convert the primary artifact into extra formats ([`pipeline`])
//! 7. **Index**: write `index.json`, `index.html` and `feed.xml` ([`index`], [`outputs`])
//!
//! All cross-stage state lives in [`pipeline::BuildContext`].

pub mod cache;
pub mod cli;
pub mod config;
pub mod cover;
pub mod index;
pub mod invoker;
pub mod models;
pub mod ordering;
pub mod outputs;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod schedule;
pub mod sections;
pub mod utils;
