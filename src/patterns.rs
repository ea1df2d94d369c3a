//! Link detection and rewriting.
//!
//! The engine is stateless: every call re-derives its matches from the
//! input text, so scanning the same message twice yields the same links.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A social-media service whose links get rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    Twitter,
    Instagram,
    Reddit,
    Threads,
    Pixiv,
    Bluesky,
}

impl Service {
    /// Every supported service, in the default settings order
    pub const ALL: [Service; 6] = [
        Service::Twitter,
        Service::Instagram,
        Service::Reddit,
        Service::Threads,
        Service::Pixiv,
        Service::Bluesky,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Twitter => "Twitter",
            Service::Instagram => "Instagram",
            Service::Reddit => "Reddit",
            Service::Threads => "Threads",
            Service::Pixiv => "Pixiv",
            Service::Bluesky => "Bluesky",
        }
    }

    /// Map a lowercased host onto its service
    fn from_host(host: &str) -> Option<Self> {
        match host {
            "twitter.com" | "x.com" => Some(Service::Twitter),
            "instagram.com" => Some(Service::Instagram),
            "reddit.com" | "old.reddit.com" => Some(Service::Reddit),
            "pixiv.net" => Some(Service::Pixiv),
            "threads.net" | "threads.com" => Some(Service::Threads),
            "bsky.app" => Some(Service::Bluesky),
            _ => None,
        }
    }

    /// Embed-friendly replacement for a lowercased host of this service
    fn rewrite_host(self, host: &str) -> &'static str {
        match self {
            Service::Twitter if host == "x.com" => "fixupx.com",
            Service::Twitter => "fxtwitter.com",
            Service::Instagram => "instafix.ldez.top",
            Service::Reddit if host == "old.reddit.com" => "old.rxddit.com",
            Service::Reddit => "vxreddit.ldez.workers.dev",
            Service::Threads => "fixthreads.net",
            Service::Pixiv => "phixiv.net",
            Service::Bluesky => "fxbsky.app",
        }
    }

    /// Secondary pattern applied to the path to pull out the display identity
    fn identity_pattern(self) -> &'static Regex {
        match self {
            Service::Twitter => &TWITTER_IDENTITY,
            Service::Instagram => &INSTAGRAM_IDENTITY,
            Service::Reddit => &REDDIT_IDENTITY,
            Service::Threads => &THREADS_IDENTITY,
            Service::Pixiv => &PIXIV_IDENTITY,
            Service::Bluesky => &BLUESKY_IDENTITY,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|service| service.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown service: {}", s))
    }
}

/// Host and path alternatives of every supported link shape.
///
/// Hosts are matched case-insensitively, path segments are not.
const LINK_BODY: &str = concat!(
    r"(?i:https?://(?:www\.)?)(",
    r"(?i:twitter\.com|x\.com)/[A-Za-z0-9_]+/status/[0-9]+",
    r"|(?i:instagram\.com)/(?:p|reel)/[A-Za-z0-9_-]+",
    r"|(?i:reddit\.com)/r/[A-Za-z0-9_]+/s/[A-Za-z0-9_]+",
    r"|(?i:reddit\.com)/r/[A-Za-z0-9_]+/comments/[A-Za-z0-9_]+/[A-Za-z0-9_]+",
    r"|(?i:old\.reddit\.com)/r/[A-Za-z0-9_]+/comments/[A-Za-z0-9_]+/[A-Za-z0-9_]+",
    r"|(?i:pixiv\.net)/(?:en/)?artworks/[0-9]+",
    r"|(?i:threads\.(?:net|com))/@[^/]+/post/[A-Za-z0-9_-]+",
    r"|(?i:bsky\.app)/profile/[^/]+/post/[A-Za-z0-9_-]+",
    r")"
);

static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(LINK_BODY).unwrap());
static SUPPRESSED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"<{}[^\s>]*>", LINK_BODY)).unwrap());

static TWITTER_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_]+)/status/[0-9]+").unwrap());
static INSTAGRAM_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:p|reel)/([A-Za-z0-9_-]+)").unwrap());
static REDDIT_IDENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^r/([A-Za-z0-9_]+)").unwrap());
static PIXIV_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:en/)?artworks/([0-9]+)").unwrap());
static THREADS_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([^/]+)/post/([A-Za-z0-9_-]+)").unwrap());
static BLUESKY_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^profile/([^/]+)/post/([A-Za-z0-9_-]+)").unwrap());

/// Identity shown when the secondary pattern finds nothing
pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// A recognized link and its embed-friendly rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatch {
    pub service: Service,
    /// The link as written in the message, scheme included
    pub original_url: String,
    /// The rewritten link, always `https://`
    pub rewritten_url: String,
    /// Username, subreddit, post id or handle, depending on the service
    pub identity: String,
    pub display_label: String,
}

/// Outcome of scanning a whole message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// At least one link was wrapped in `<...>`; the message is left alone
    Suppressed,
    Links(Vec<LinkMatch>),
}

/// Recognizes supported-service links and builds their rewrites
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternEngine {
    _private: (),
}

impl PatternEngine {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Whether any supported link in the text uses angle-bracket suppression
    pub fn is_suppressed(&self, text: &str) -> bool {
        SUPPRESSED_RE.is_match(text)
    }

    /// Lazily yield every supported link in the text, in order of appearance
    pub fn find_links<'a>(&'a self, text: &'a str) -> impl Iterator<Item = LinkMatch> + 'a {
        LINK_RE.captures_iter(text).filter_map(|caps| {
            let original = caps.get(0)?.as_str();
            let body = caps.get(1)?.as_str();
            Self::transform(original, body)
        })
    }

    /// Scan a message; suppression anywhere wins over any number of matches
    pub fn scan(&self, text: &str) -> Scan {
        if self.is_suppressed(text) {
            return Scan::Suppressed;
        }
        Scan::Links(self.find_links(text).collect())
    }

    fn transform(original: &str, body: &str) -> Option<LinkMatch> {
        let (host, path) = body.split_once('/')?;
        let host = host.to_ascii_lowercase();
        let service = Service::from_host(&host)?;

        let captures = service.identity_pattern().captures(path);
        let identity = captures
            .as_ref()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string());

        let display_label = match service {
            Service::Threads if identity != UNKNOWN_IDENTITY => {
                format!("{} • @{}", service, identity)
            }
            _ => format!("{} • {}", service, identity),
        };

        Some(LinkMatch {
            service,
            original_url: original.to_string(),
            rewritten_url: format!("https://{}/{}", service.rewrite_host(&host), path),
            identity,
            display_label,
        })
    }
}
