pub mod cli;
pub mod cluster;
pub mod command;
pub mod config;
pub mod inventory;
pub mod manager;
pub mod monitoring;
pub mod node;
pub mod selector;
pub mod ssh;
pub mod utils;

pub use cli::Cli;
pub use cluster::Cluster;
pub use config::Config;
pub use manager::{Manager, Options, RunOutcome};
pub use node::{CompositeNode, Node};
