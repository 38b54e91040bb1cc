use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Display text on a Link is truncated to this many characters.
pub const MAX_LINK_TEXT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub Uuid);

/// Polymorphic reference to a source object: a registry type tag plus the
/// object's identifier within that source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub type_tag: String,
    pub object_id: String,
}

impl SourceRef {
    pub fn new(type_tag: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            object_id: object_id.into(),
        }
    }
}

/// What kind of URL a string is, decided in this priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlType {
    External,
    Mailto,
    Phone,
    Empty,
    Anchor,
    File,
    Internal,
    Invalid,
}

/// Strip a configured site-domain prefix so internal absolute URLs are
/// tested as paths. Only the first matching prefix is removed.
pub fn strip_site_domain<'a>(url: &'a str, config: &Config) -> &'a str {
    for prefix in &config.site_domains {
        if !prefix.is_empty() {
            if let Some(rest) = url.strip_prefix(prefix.as_str()) {
                return rest;
            }
        }
    }
    url
}

fn has_external_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Classify a URL string. Pure: the same string and config always yield the
/// same type.
pub fn classify(url: &str, config: &Config) -> UrlType {
    let tested = strip_site_domain(url, config);
    if has_external_scheme(tested) {
        UrlType::External
    } else if tested.starts_with("mailto:") {
        UrlType::Mailto
    } else if tested.starts_with("tel:") {
        UrlType::Phone
    } else if tested.is_empty() {
        UrlType::Empty
    } else if tested.starts_with('#') {
        UrlType::Anchor
    } else if tested.starts_with(&config.media_prefix) {
        UrlType::File
    } else if tested.starts_with('/') {
        UrlType::Internal
    } else {
        UrlType::Invalid
    }
}

/// One distinct URL string and its latest verification result.
///
/// The string is the identity: a Url is never re-pointed at a different
/// address. Many Links may reference one Url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Url {
    pub id: UrlId,
    pub url: String,
    /// None means never checked.
    pub last_checked: Option<DateTime<Utc>>,
    /// None means "not automatically checked" (mailto/tel/anchor) or never
    /// checked; Some(true)/Some(false) is a definitive verdict.
    pub status: Option<bool>,
    pub status_code: Option<i32>,
    pub redirect_status_code: Option<i32>,
    pub anchor_status: Option<bool>,
    pub ssl_status: Option<bool>,
    pub message: String,
    pub error_message: String,
    /// Final destination when the check followed a redirect, empty if none.
    pub redirect_to: String,
}

impl Url {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: UrlId(Uuid::new_v4()),
            url: url.into(),
            last_checked: None,
            status: None,
            status_code: None,
            redirect_status_code: None,
            anchor_status: None,
            ssl_status: None,
            message: String::new(),
            error_message: String::new(),
            redirect_to: String::new(),
        }
    }

    pub fn url_type(&self, config: &Config) -> UrlType {
        classify(&self.url, config)
    }

    /// Message for display, covering the never-checked case.
    pub fn get_message(&self) -> &str {
        if self.last_checked.is_some() {
            &self.message
        } else {
            "URL Not Yet Checked"
        }
    }

    /// Traffic-light colour for status rendering.
    pub fn colour(&self) -> &'static str {
        if self.last_checked.is_none() {
            "blue"
        } else if self.status == Some(true) {
            "green"
        } else {
            "red"
        }
    }

    pub fn anchor_message(&self) -> &'static str {
        match self.anchor_status {
            Some(true) => "Working hash anchor",
            Some(false) => "Broken hash anchor",
            None => "",
        }
    }

    pub fn ssl_message(&self) -> &'static str {
        match self.ssl_status {
            Some(true) => "Valid SSL certificate",
            Some(false) => "Broken SSL certificate",
            None => "",
        }
    }

    /// The `#fragment` part of the URL, if any.
    pub fn fragment(&self) -> Option<&str> {
        self.url.split_once('#').map(|(_, fragment)| fragment)
    }
}

/// One occurrence of a Url inside one field of one source object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub source: SourceRef,
    pub field: String,
    pub url_id: UrlId,
    pub text: String,
    /// Operator-set flag to suppress alerting on a known-broken link.
    pub ignore: bool,
}

impl Link {
    pub fn new(source: SourceRef, field: impl Into<String>, text: &str, url_id: UrlId) -> Self {
        Self {
            id: LinkId(Uuid::new_v4()),
            source,
            field: field.into(),
            url_id,
            text: truncate_text(text),
            ignore: false,
        }
    }

    /// How the URL should be shown next to this link. A hash link from a
    /// page to itself (`/about/#team` on `/about/`) displays as `#team`.
    pub fn display_url<'a>(&self, url: &'a str, canonical_url: Option<&str>) -> &'a str {
        if let (Some((path, fragment)), Some(own_url)) = (url.split_once('#'), canonical_url) {
            if path == own_url {
                // Include the '#'.
                return &url[url.len() - fragment.len() - 1..];
            }
        }
        url
    }
}

/// Truncate display text at a char boundary.
pub fn truncate_text(text: &str) -> String {
    match text.char_indices().nth(MAX_LINK_TEXT) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
