pub mod config;

pub use config::{AgentSection, ConfigError, TckConfig};
