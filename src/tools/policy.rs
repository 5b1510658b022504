//! Named tool allow-lists.
//!
//! A profile maps to either `null` (every registered tool) or an explicit
//! list of tool names. Runs without a profile may use every tool.

use std::collections::{HashMap, HashSet};

use crate::error::{ClawError, Result};

/// Allow-list in effect for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolPolicy {
    /// Profile name, `None` for the unrestricted default
    pub name: Option<String>,
    allow: Option<HashSet<String>>,
}

impl ToolPolicy {
    /// Every tool allowed.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Only the listed tools.
    pub fn allow_only<I, S>(name: &str, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: Some(name.to_string()),
            allow: Some(tools.into_iter().map(Into::into).collect()),
        }
    }

    /// Look up `name` in the configured profiles.
    ///
    /// `None` yields the unrestricted policy. An unknown profile name is a
    /// configuration error rather than a silent allow-all.
    pub fn from_profiles(
        profiles: &HashMap<String, Option<Vec<String>>>,
        name: Option<&str>,
    ) -> Result<Self> {
        let Some(name) = name else {
            return Ok(Self::allow_all());
        };
        match profiles.get(name) {
            Some(Some(tools)) => Ok(Self::allow_only(name, tools.iter().cloned())),
            Some(None) => Ok(Self {
                name: Some(name.to_string()),
                allow: None,
            }),
            None => Err(ClawError::Config(format!("unknown tool profile '{}'", name))),
        }
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.allow.as_ref().map_or(true, |set| set.contains(tool))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allow.is_none()
    }
}
