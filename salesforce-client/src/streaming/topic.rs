//! Topic mode templates.

use super::Error;
use std::collections::HashMap;

/// Change data capture mode.
pub const CDC: &str = "CDC";

/// Platform event mode.
pub const EVENT: &str = "Event";

/// PushTopic mode.
pub const PUSH_TOPIC: &str = "PushTopic";

const PLACEHOLDER: &str = "%s";

/// Maps a topic mode to the channel template it expands into.
///
/// The default table knows [`CDC`], [`EVENT`] and [`PUSH_TOPIC`]; further
/// modes can be registered with [`TopicTemplates::with_template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplates {
    templates: HashMap<String, String>,
}

impl Default for TopicTemplates {
    fn default() -> Self {
        TopicTemplates::empty()
            .with_template(CDC, "/data/%sChangeEvent")
            .with_template(EVENT, "/event/%s")
            .with_template(PUSH_TOPIC, "/topic/%s")
    }
}

impl TopicTemplates {
    /// A table with no modes.
    pub fn empty() -> Self {
        TopicTemplates {
            templates: HashMap::new(),
        }
    }

    /// Adds or replaces the template for `mode`. `%s` marks the topic name.
    pub fn with_template(mut self, mode: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(mode.into(), template.into());
        self
    }

    /// Expands `topic` into the wire channel for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] if `mode` has no template.
    pub fn resolve(&self, mode: &str, topic: &str) -> Result<String, Error> {
        self.templates
            .get(mode)
            .map(|template| template.replacen(PLACEHOLDER, topic, 1))
            .ok_or_else(|| Error::InvalidMode(mode.to_string()))
    }

    /// Known modes, sorted.
    pub fn modes(&self) -> Vec<&str> {
        let mut modes: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        modes.sort_unstable();
        modes
    }
}
