//! Resource handlers — render engine blocks for each resource type.
//!
//! Each handler turns one resolved instance into the engine blocks that
//! describe it. References to other resources become engine interpolations
//! (`${aws_vpc.main.id}`) so the engine wires identifiers at apply time.

pub mod compute;
pub mod network;
pub mod traffic;
