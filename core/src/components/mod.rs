use serde::{Deserialize, Serialize};

pub mod client;
pub mod server;

/// Lifecycle shared by all applications: `Idle -> Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AppState {
    #[default]
    Idle,
    Running,
    Stopped,
}
