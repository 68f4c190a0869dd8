//! Deckhand — declarative container stacks.
//!
//! A YAML stack declaration becomes a resource graph, the graph becomes an
//! engine document, and an external engine reconciles the cloud against it.
//! A six-step pipeline builds, publishes and rolls out the container image.

pub mod cli;
pub mod core;
pub mod pipeline;
pub mod resources;
pub mod telemetry;
pub mod transport;
pub mod tripwire;
