use crate::{
    github::TagSource,
    tag::{self, Tag},
};
use anyhow::Result;
use lazy_regex::regex;
use log::{debug, info};
use quick_xml::escape::escape;
use regex::Regex;
use std::{fmt, ops::Range};
use thiserror::Error;

/// The `id` of the element holding the release link.
pub const ELEMENT_ID: &str = "releases";

/// The text shown in front of the emphasized release label.
pub const LINK_TEXT: &str = "Latest release";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("the page has no element with id=\"{ELEMENT_ID}\"")]
    ElementNotFound,
    #[error("the <{0}> element with id=\"{ELEMENT_ID}\" is never closed")]
    Unclosed(String),
    #[error("the element with id=\"{ELEMENT_ID}\" has no href attribute")]
    MissingHref,
    #[error("the tag listing is empty")]
    NoTags,
}

/// The location of the release link inside a page.
///
/// All positions are byte ranges into the page, so applying a tag rewrites exactly the href value
/// and the element's content and leaves every other byte alone.
#[derive(Debug)]
pub struct ReleaseLink<'a> {
    page: &'a str,
    element: String,
    href: Option<Range<usize>>,
    inner: Range<usize>,
}

impl<'a> ReleaseLink<'a> {
    /// Finds the element with `id="releases"` in `page`. Attribute values may be quoted or not.
    ///
    /// The element ends at the first closing tag with the same name. That is right for the usual
    /// `<a>` link, but an element that contains another element of its own kind, like a `<div>`
    /// inside a `<div>`, ends too early.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ElementNotFound`] if there is no such element and
    /// [`LinkError::Unclosed`] if the element has no closing tag.
    pub fn find(page: &'a str) -> Result<Self, LinkError> {
        let start_tag_re = regex!(
            r#"(?i)<([a-z][a-z0-9-]*)\s(?:[^>]*?\s)?id\s*=\s*(?:"releases"[^>]*|'releases'[^>]*|releases(?:[\s/][^>]*)?)>"#
        );
        let caps = start_tag_re
            .captures(page)
            .ok_or(LinkError::ElementNotFound)?;
        let start_tag = caps.get(0).ok_or(LinkError::ElementNotFound)?;
        let element = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or(LinkError::ElementNotFound)?;
        debug!("found <{element}> with id=\"{ELEMENT_ID}\" at byte {}", start_tag.start());

        let href = find_href(start_tag.as_str())
            .map(|r| start_tag.start() + r.start..start_tag.start() + r.end);

        let close_re = Regex::new(&format!(r"(?i)</{}\s*>", regex::escape(&element)))
            .map_err(|_| LinkError::Unclosed(element.clone()))?;
        let close = close_re
            .find_at(page, start_tag.end())
            .ok_or_else(|| LinkError::Unclosed(element.clone()))?;

        Ok(ReleaseLink {
            page,
            element,
            href,
            inner: start_tag.end()..close.start(),
        })
    }

    /// The name of the element, normally `a`.
    #[must_use]
    pub fn element(&self) -> &str {
        &self.element
    }

    #[must_use]
    pub fn href(&self) -> Option<&'a str> {
        self.href.clone().map(|r| &self.page[r])
    }

    #[must_use]
    pub fn inner_html(&self) -> &'a str {
        &self.page[self.inner.clone()]
    }

    /// Returns a copy of the page with the link pointing at `tag`. The href gets `/tags/<name>`
    /// appended, and the content becomes `Latest release<strong>LABEL</strong>`, where the label
    /// is the tag name without its leading `v`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::MissingHref`] if the element has no `href` attribute to extend.
    pub fn apply(&self, tag: &Tag) -> Result<String, LinkError> {
        let href = self.href.clone().ok_or(LinkError::MissingHref)?;

        let mut page = String::with_capacity(self.page.len() + 64);
        page.push_str(&self.page[..href.end]);
        page.push_str("/tags/");
        page.push_str(&escape(tag.name.as_str()));
        page.push_str(&self.page[href.end..self.inner.start]);
        page.push_str(&link_markup(tag));
        page.push_str(&self.page[self.inner.end..]);

        Ok(page)
    }
}

/// The content the link gets for `tag`.
#[must_use]
pub fn link_markup(tag: &Tag) -> String {
    format!("{LINK_TEXT}<strong>{}</strong>", escape(tag.label()))
}

// Returns the byte range of the href value within the start tag, without any quotes.
fn find_href(start_tag: &str) -> Option<Range<usize>> {
    let href_re = regex!(r#"(?i)\shref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#);
    let caps = href_re.captures(start_tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.range())
}

/// Points the release link in a page at the newest tag from a [`TagSource`]. Use the
/// [`ReleaseLinkBuilder`](crate::ReleaseLinkBuilder) struct to create one that talks to GitHub.
pub struct ReleaseLinkUpdater {
    source: Box<dyn TagSource + Send + Sync>,
}

impl fmt::Debug for ReleaseLinkUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseLinkUpdater").finish_non_exhaustive()
    }
}

impl ReleaseLinkUpdater {
    pub fn new(source: Box<dyn TagSource + Send + Sync>) -> Self {
        Self { source }
    }

    /// Returns the newest tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag source fails or if it has no tags.
    pub async fn latest_tag(&self) -> Result<Tag> {
        let tags = self.source.tags().await?;
        tag::latest(&tags)
            .cloned()
            .ok_or_else(|| LinkError::NoTags.into())
    }

    /// Like [`ReleaseLinkUpdater::update`], but any failure is returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag source fails, if it has no tags, or if the page has no usable
    /// release link.
    pub async fn try_update(&self, page: &str) -> Result<String> {
        let link = ReleaseLink::find(page)?;
        let tag = self.latest_tag().await?;
        let updated = link.apply(&tag)?;
        info!("Pointed the release link at {}", tag.name);
        Ok(updated)
    }

    /// Returns `page` with the release link pointing at the newest tag. If anything goes wrong
    /// the page is returned exactly as it was given. Failures are only logged at debug level.
    pub async fn update(&self, page: &str) -> String {
        match self.try_update(page).await {
            Ok(updated) => updated,
            Err(e) => {
                debug!("leaving the release link unchanged: {e:#}");
                page.to_string()
            }
        }
    }
}
