pub mod error;
pub use error::Result;
pub use error::Error;

pub mod config;
pub use config::Config;

pub mod repodata;
pub mod cache_manager;
pub mod build_system;
pub mod repo_cache;
pub mod solver;
pub mod db;
pub mod dependency_cache;
pub mod events;
pub mod resolver;
pub mod priority;
pub mod scheduler;
pub mod poller;

pub mod session;
pub use session::Session;
