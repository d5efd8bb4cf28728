use serde::{Deserialize, Serialize};

/// A single tag as returned by the GitHub `repos/<owner>/<repo>/tags` endpoint. Only the name is
/// used, so every other field in the response is ignored.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Tag { name: name.into() }
    }

    /// The name as shown to people, see [`display_label`].
    #[must_use]
    pub fn label(&self) -> &str {
        display_label(&self.name)
    }
}

/// Returns the newest tag in a tag listing.
///
/// GitHub returns tags newest first. That ordering is a property of the API and nothing here
/// checks it, so this is simply the first element.
#[must_use]
pub fn latest(tags: &[Tag]) -> Option<&Tag> {
    tags.first()
}

/// Strips a single leading `v` from a tag name, so `v0.4` is shown as `0.4`. Names without a
/// leading `v` are returned as-is.
#[must_use]
pub fn display_label(name: &str) -> &str {
    name.strip_prefix('v').unwrap_or(name)
}
