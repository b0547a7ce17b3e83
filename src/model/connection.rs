use serde::{Deserialize, Serialize};

use super::MAIN_PORT;

fn main_port() -> String {
    MAIN_PORT.to_string()
}

/// A directed data-flow connection between two node ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionModel {
    pub source: String,
    #[serde(default = "main_port")]
    pub source_port: String,
    pub target: String,
    #[serde(default = "main_port")]
    pub target_port: String,
}

impl ConnectionModel {
    /// A `main` to `main` connection.
    pub fn new(
        source: &str,
        target: &str,
    ) -> Self {
        Self {
            source: source.to_string(),
            source_port: main_port(),
            target: target.to_string(),
            target_port: main_port(),
        }
    }

    pub fn from_port(
        mut self,
        port: &str,
    ) -> Self {
        self.source_port = port.to_string();
        self
    }

    pub fn to_port(
        mut self,
        port: &str,
    ) -> Self {
        self.target_port = port.to_string();
        self
    }
}
