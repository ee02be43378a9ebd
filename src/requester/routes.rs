use regex::Regex;
use std::collections::BTreeMap;

use crate::registry::anchored;
use crate::{Channel, Result};

/// Destination channels for outgoing requests.
///
/// Exact names win over patterns; patterns are tried in the order they sort
/// by their source text (the configuration maps are ordered).
#[derive(Debug, Clone, Default)]
pub(crate) struct RouteTable {
    pub names: BTreeMap<String, Channel>,
    pub patterns: Vec<PatternRoute>,
}

#[derive(Debug, Clone)]
pub(crate) struct PatternRoute {
    pub source: String,
    pub regex: Regex,
    pub channel: Channel,
}

impl RouteTable {
    // ---

    pub fn build(
        names: &BTreeMap<String, String>,
        patterns: &BTreeMap<String, String>,
    ) -> Result<Self> {
        // ---
        let names = names
            .iter()
            .map(|(name, channel)| (name.clone(), Channel::from(channel.as_str())))
            .collect();

        let patterns = patterns
            .iter()
            .map(|(source, channel)| {
                Ok(PatternRoute {
                    source: source.clone(),
                    regex: anchored(source)?,
                    channel: Channel::from(channel.as_str()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { names, patterns })
    }

    pub fn resolve(&self, name: &str) -> Option<&Channel> {
        // ---
        self.names.get(name).or_else(|| {
            self.patterns
                .iter()
                .find(|route| route.regex.is_match(name))
                .map(|route| &route.channel)
        })
    }
}
