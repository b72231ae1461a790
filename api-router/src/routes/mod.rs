pub mod commits;
pub mod enrichments;
pub mod health;
pub mod mcp;
pub mod queue;
pub mod repositories;
pub mod search;
