//! Support-desk building blocks shared by the `chorus` binary and the
//! evaluation driver: the Chinook catalog, its tools, the agent prompts and
//! the wiring that turns them into a graph runner.

pub mod catalog;
pub mod prompts;
pub mod resolver;
pub mod team;
pub mod tools;
