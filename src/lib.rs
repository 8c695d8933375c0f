pub mod agent;
pub mod browser;
pub mod computer;
pub mod config;
pub mod cua;
pub mod executor;
pub mod input_request;
pub mod operator;
pub mod prompts;
pub mod retry;
pub mod safety;
pub mod snapshot;

pub use agent::{AgentError, AutomationEngine, EngineConfig, RunReport, RunStatus};
pub use browser::{Browser, BrowserConfig};
pub use computer::{ChromiumComputer, Computer};
pub use config::Settings;
pub use cua::{CuaClient, CuaConfig, Planner};
pub use operator::{ConsoleOperator, Operator};
