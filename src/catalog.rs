//! The in-memory tool catalog: lookup, filtering and search over the
//! metadata document.

use crate::error::{Error, Result};
use crate::types::Tool;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Ordered collection of tools; insertion order is listing order.
/// Loaded once per run and treated as read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Catalog {
    pub tools: Vec<Tool>,
}

impl Catalog {
    /// Parse the metadata document. Tools without a binary path template
    /// get the conventional `${target}/bin/${name}`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut catalog: Catalog = serde_json::from_slice(bytes)?;
        for tool in &mut catalog.tools {
            if tool.binary.is_empty() {
                tool.binary = "${target}/bin/${name}".to_string();
            }
        }
        tracing::debug!("Loaded catalog with {} tools", catalog.tools.len());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Tool> {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// Subset preserving the input order; unknown names are dropped.
    pub fn get_by_names(&self, names: &[String]) -> Catalog {
        let tools = names
            .iter()
            .filter_map(|name| self.tools.iter().find(|t| &t.name == name))
            .cloned()
            .collect();
        Catalog { tools }
    }

    /// Union of all tools carrying any of `tags`. Each tool appears once
    /// even when several tags match.
    pub fn get_by_tags(&self, tags: &[String]) -> Catalog {
        let tools = self
            .tools
            .iter()
            .filter(|t| t.tags.iter().any(|tag| tags.contains(tag)))
            .cloned()
            .collect();
        Catalog { tools }
    }

    /// Regex/substring search OR'd across the enabled fields.
    pub fn find(
        &self,
        term: &str,
        search_name: bool,
        search_tags: bool,
        search_deps: bool,
    ) -> Result<Catalog> {
        let pattern = Regex::new(term)?;
        let tools = self
            .tools
            .iter()
            .filter(|t| {
                (search_name && pattern.is_match(&t.name))
                    || (search_tags && t.tags.iter().any(|tag| pattern.is_match(tag)))
                    || (search_deps
                        && t.runtime_dependencies
                            .iter()
                            .chain(t.build_dependencies.iter())
                            .any(|dep| pattern.is_match(dep)))
            })
            .cloned()
            .collect();
        Ok(Catalog { tools })
    }
}
