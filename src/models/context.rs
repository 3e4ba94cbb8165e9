use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    App,
    Url,
    Project,
    Topic,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::App => "app",
            ContextType::Url => "url",
            ContextType::Project => "project",
            ContextType::Topic => "topic",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "app" => Ok(ContextType::App),
            "url" => Ok(ContextType::Url),
            "project" => Ok(ContextType::Project),
            "topic" => Ok(ContextType::Topic),
            other => Err(anyhow!("unknown context type '{other}'")),
        }
    }
}

/// A deduplicated named entity shared across the whole database.
/// Uniqueness on (type, name) is enforced by the schema; `get_or_create`
/// on the repository is the only creation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub id: String,
    pub context_type: ContextType,
    pub name: String,
}
