//! Core stack logic — types, parsing, addressing, rendering, planning, execution.

pub mod cidr;
pub mod codegen;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
