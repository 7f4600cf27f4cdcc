//! Mockhearth: a programmable HTTP mock server driven by hot-reloadable
//! declarative YAML scenarios.
//!
//! The pipeline a request travels: load scenarios from disk ([`loader`]),
//! compile them into immutable matchers ([`compiler`]), group and sort into a
//! [`ScenarioIndex`](index::ScenarioIndex) and a route table (both published
//! together as one [`Generation`](generation::Generation)), evaluate the
//! first matching candidate for a request ([`evaluator`]), and run the
//! matched scenario's policy and response through the response
//! [`pipeline`]. The [`http`] module wires this to a hyper server; [`watcher`]
//! keeps the live generation in sync with the scenario root on disk.

pub mod compiler;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod extractor;
pub mod generation;
pub mod http;
pub mod index;
pub mod loader;
pub mod pipeline;
pub mod ratelimiter;
pub mod scenario;
pub mod template;
pub mod trace;
pub mod watcher;
