//! Resource interest filtering
//!
//! Decides, per mutation, whether a node is about to fetch something worth
//! waiting for. A node rejected on one pass may be accepted on a later one
//! once its attributes change.

use crate::error::{CorrelateError, CorrelateResult};
use regex::Regex;
use settle_core::config::ExclusionSettings;
use settle_core::model::{NodeId, NodeSnapshot, ResourceKind};

/// URLs that are never tracked
#[derive(Debug, Clone, Default)]
pub struct UrlExclusions {
    /// Substring matches
    substrings: Vec<String>,

    /// Regex matches
    patterns: Vec<Regex>,
}

impl UrlExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ExclusionSettings) -> CorrelateResult<Self> {
        let mut exclusions = Self::new();
        for url in &settings.urls {
            exclusions = exclusions.exclude_url(url.clone());
        }
        for pattern in &settings.patterns {
            exclusions = exclusions.exclude_pattern(pattern)?;
        }
        Ok(exclusions)
    }

    /// Add a URL substring to exclude
    pub fn exclude_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !url.is_empty() {
            self.substrings.push(url);
        }
        self
    }

    /// Add a regex pattern to exclude
    pub fn exclude_pattern(mut self, pattern: &str) -> CorrelateResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| CorrelateError::InvalidPattern {
            pattern: pattern.to_string(),
            source: e,
        })?;
        self.patterns.push(regex);
        Ok(self)
    }

    pub fn matches(&self, url: &str) -> bool {
        self.substrings.iter().any(|s| url.contains(s.as_str()))
            || self.patterns.iter().any(|p| p.is_match(url))
    }

    pub fn is_empty(&self) -> bool {
        self.substrings.is_empty() && self.patterns.is_empty()
    }
}

/// Why a node was not worth waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotElement,
    NoUrl,
    /// `about:`, `javascript:` or `data:` URL
    InlineScheme,
    AlreadyLoaded,
    /// Still loading the same URL for an earlier event
    AlreadyWatched,
    ZeroBytePlaceholder,
    LazyImage,
    /// 1x1 or smaller
    TinyBox,
    Hidden,
    /// A frame whose src changed in place never reports a reliable load
    FrameSrcChanged,
    Excluded,
}

/// Filter decision for a single node
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept { url: String, kind: ResourceKind },
    Reject(Rejection),
    /// Not a resource itself; its descendant images may be
    Container,
}

/// What the engine last watched a node for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorWatch<'a> {
    pub url: &'a str,

    /// The load for `url` already finished
    pub complete: bool,
}

/// A node accepted by the filter
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub node: NodeId,
    pub tag: String,
    pub url: String,
    pub kind: ResourceKind,
}

/// Resource interest filter
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    exclusions: UrlExclusions,
}

impl ResourceFilter {
    pub fn new(exclusions: UrlExclusions) -> Self {
        Self { exclusions }
    }

    pub fn exclusions(&self) -> &UrlExclusions {
        &self.exclusions
    }

    /// Whether a network call to `url` should be tracked at all
    pub fn is_excluded(&self, url: &str) -> bool {
        self.exclusions.matches(url)
    }

    /// `prior` is the engine's last watch of this node, if it has one.
    pub fn is_interesting(&self, node: &NodeSnapshot, prior: Option<PriorWatch<'_>>) -> bool {
        matches!(self.evaluate(node, prior), Verdict::Accept { .. })
    }

    pub fn evaluate(&self, node: &NodeSnapshot, prior: Option<PriorWatch<'_>>) -> Verdict {
        if !node.is_element() {
            return Verdict::Reject(Rejection::NotElement);
        }

        let kind = match resource_kind(node) {
            Some(kind) => kind,
            None => return Verdict::Container,
        };

        let url = match node.resource_url() {
            Some(url) => url,
            None => return Verdict::Reject(Rejection::NoUrl),
        };
        if is_inline_scheme(url) {
            return Verdict::Reject(Rejection::InlineScheme);
        }

        match prior {
            Some(p) if p.url == url && p.complete => {
                return Verdict::Reject(Rejection::AlreadyLoaded)
            }
            Some(p) if p.url == url => return Verdict::Reject(Rejection::AlreadyWatched),
            _ => {}
        }
        // any prior watch left is for another URL
        let src_changed = prior.is_some();

        if node.tag_is("IMG") {
            if node.natural_width > 0 && !src_changed {
                return Verdict::Reject(Rejection::AlreadyLoaded);
            }
            if node.complete && node.natural_width == 0 && node.natural_height == 0 {
                return Verdict::Reject(Rejection::ZeroBytePlaceholder);
            }
            if node
                .attr("loading")
                .is_some_and(|l| l.eq_ignore_ascii_case("lazy"))
            {
                return Verdict::Reject(Rejection::LazyImage);
            }
        }

        if is_tiny_box(node) {
            return Verdict::Reject(Rejection::TinyBox);
        }
        if is_hidden(node) {
            return Verdict::Reject(Rejection::Hidden);
        }
        if kind == ResourceKind::Frame && src_changed {
            return Verdict::Reject(Rejection::FrameSrcChanged);
        }
        if self.exclusions.matches(url) {
            return Verdict::Reject(Rejection::Excluded);
        }

        Verdict::Accept {
            url: url.to_string(),
            kind,
        }
    }

    /// Accepted nodes for one mutation target: the node itself, or for a
    /// container, its descendant images.
    pub fn candidates<'a, F>(&self, node: &NodeSnapshot, prior: F) -> Vec<Candidate>
    where
        F: Fn(NodeId) -> Option<PriorWatch<'a>>,
    {
        match self.evaluate(node, prior(node.id)) {
            Verdict::Accept { url, kind } => vec![Candidate {
                node: node.id,
                tag: node.tag.clone(),
                url,
                kind,
            }],
            Verdict::Reject(_) => Vec::new(),
            Verdict::Container => node
                .descendants()
                .into_iter()
                .filter(|d| d.tag_is("IMG") || d.tag_is("IMAGE"))
                .filter_map(|d| match self.evaluate(d, prior(d.id)) {
                    Verdict::Accept { url, kind } => Some(Candidate {
                        node: d.id,
                        tag: d.tag.clone(),
                        url,
                        kind,
                    }),
                    _ => None,
                })
                .collect(),
        }
    }
}

fn resource_kind(node: &NodeSnapshot) -> Option<ResourceKind> {
    if node.tag_is("IMG") || node.tag_is("IMAGE") {
        Some(ResourceKind::Image)
    } else if node.tag_is("IFRAME") {
        Some(ResourceKind::Frame)
    } else if node.tag_is("LINK")
        && node.attr("rel").is_some_and(|rel| {
            rel.split_whitespace()
                .any(|token| token.eq_ignore_ascii_case("stylesheet"))
        })
    {
        Some(ResourceKind::Stylesheet)
    } else {
        None
    }
}

fn is_inline_scheme(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    ["about:", "javascript:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Parse `"1"`, `"1px"` or `" 0.5px "` into CSS pixels
fn parse_px(value: &str) -> Option<f64> {
    let value = value.trim();
    let value = value.strip_suffix("px").unwrap_or(value).trim();
    value.parse::<f64>().ok()
}

fn is_tiny_box(node: &NodeSnapshot) -> bool {
    let width = node.attr("width").and_then(parse_px).or(node.style.width);
    let height = node.attr("height").and_then(parse_px).or(node.style.height);
    matches!((width, height), (Some(w), Some(h)) if w <= 1.0 && h <= 1.0)
}

fn is_hidden(node: &NodeSnapshot) -> bool {
    let display_none = node
        .style
        .display
        .as_deref()
        .is_some_and(|d| d.eq_ignore_ascii_case("none"));
    let invisible = node.style.visibility.as_deref().is_some_and(|v| {
        v.eq_ignore_ascii_case("hidden") || v.eq_ignore_ascii_case("collapse")
    });
    display_none || invisible
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::model::NodeStyle;

    fn filter() -> ResourceFilter {
        ResourceFilter::default()
    }

    #[test]
    fn test_accepts_fresh_image() {
        let img = NodeSnapshot::image(1, "https://cdn.example.com/hero.jpg");
        assert_eq!(
            filter().evaluate(&img, None),
            Verdict::Accept {
                url: "https://cdn.example.com/hero.jpg".to_string(),
                kind: ResourceKind::Image
            }
        );
    }

    #[test]
    fn test_rejects_inline_schemes() {
        for src in ["data:image/png;base64,AAAA", "about:blank", "JavaScript:void(0)"] {
            let node = NodeSnapshot::image(1, src);
            assert_eq!(
                filter().evaluate(&node, None),
                Verdict::Reject(Rejection::InlineScheme),
                "{}",
                src
            );
        }
    }

    #[test]
    fn test_rejects_missing_url() {
        let img = NodeSnapshot::element(1, "img");
        assert_eq!(filter().evaluate(&img, None), Verdict::Reject(Rejection::NoUrl));
    }

    #[test]
    fn test_already_loaded_image_only_when_src_unchanged() {
        let img = NodeSnapshot::image(1, "https://cdn.example.com/a.png").with_natural_size(40, 40);
        assert_eq!(
            filter().evaluate(&img, None),
            Verdict::Reject(Rejection::AlreadyLoaded)
        );

        let earlier = PriorWatch {
            url: "https://cdn.example.com/old.png",
            complete: true,
        };
        assert!(filter().is_interesting(&img, Some(earlier)));
    }

    #[test]
    fn test_unchanged_src_is_not_watched_again() {
        let url = "https://cdn.example.com/a.png";
        let img = NodeSnapshot::image(1, url)
            .with_natural_size(40, 40)
            .with_complete(true)
            .with_attr("class", "selected");
        let loaded = PriorWatch { url, complete: true };
        assert_eq!(
            filter().evaluate(&img, Some(loaded)),
            Verdict::Reject(Rejection::AlreadyLoaded)
        );

        let loading = PriorWatch { url, complete: false };
        let img = NodeSnapshot::image(1, url);
        assert_eq!(
            filter().evaluate(&img, Some(loading)),
            Verdict::Reject(Rejection::AlreadyWatched)
        );
        assert!(filter().candidates(&img, |_| Some(loading)).is_empty());
    }

    #[test]
    fn test_rejects_zero_byte_and_lazy_images() {
        let placeholder = NodeSnapshot::image(1, "https://cdn.example.com/empty.gif").with_complete(true);
        assert_eq!(
            filter().evaluate(&placeholder, None),
            Verdict::Reject(Rejection::ZeroBytePlaceholder)
        );

        let lazy = NodeSnapshot::image(2, "https://cdn.example.com/below.jpg").with_attr("loading", "lazy");
        assert_eq!(filter().evaluate(&lazy, None), Verdict::Reject(Rejection::LazyImage));
    }

    #[test]
    fn test_rejects_tracking_pixels() {
        let pixel = NodeSnapshot::image(1, "https://t.example.com/p.gif")
            .with_attr("width", "1")
            .with_attr("height", "1px");
        assert_eq!(filter().evaluate(&pixel, None), Verdict::Reject(Rejection::TinyBox));

        let styled = NodeSnapshot::image(2, "https://t.example.com/p.gif").with_style(NodeStyle {
            width: Some(0.0),
            height: Some(1.0),
            ..Default::default()
        });
        assert_eq!(filter().evaluate(&styled, None), Verdict::Reject(Rejection::TinyBox));

        // only one known dimension is not enough
        let banner = NodeSnapshot::image(3, "https://cdn.example.com/rule.png").with_attr("height", "1");
        assert!(filter().is_interesting(&banner, None));
    }

    #[test]
    fn test_rejects_hidden_nodes() {
        let hidden = NodeSnapshot::image(1, "https://cdn.example.com/a.png").with_style(NodeStyle {
            display: Some("none".to_string()),
            ..Default::default()
        });
        assert_eq!(filter().evaluate(&hidden, None), Verdict::Reject(Rejection::Hidden));

        let invisible = NodeSnapshot::element(2, "iframe")
            .with_src("https://widgets.example.com/")
            .with_style(NodeStyle {
                visibility: Some("collapse".to_string()),
                ..Default::default()
            });
        assert_eq!(filter().evaluate(&invisible, None), Verdict::Reject(Rejection::Hidden));
    }

    #[test]
    fn test_frames_and_stylesheets() {
        let frame = NodeSnapshot::element(1, "iframe").with_src("https://widgets.example.com/embed");
        assert!(filter().is_interesting(&frame, None));
        let earlier = PriorWatch {
            url: "https://widgets.example.com/home",
            complete: true,
        };
        assert_eq!(
            filter().evaluate(&frame, Some(earlier)),
            Verdict::Reject(Rejection::FrameSrcChanged)
        );
        let same = PriorWatch {
            url: "https://widgets.example.com/embed",
            complete: true,
        };
        assert_eq!(
            filter().evaluate(&frame, Some(same)),
            Verdict::Reject(Rejection::AlreadyLoaded)
        );

        let css = NodeSnapshot::element(2, "link")
            .with_attr("rel", "preload Stylesheet")
            .with_attr("href", "https://cdn.example.com/site.css");
        assert_eq!(
            filter().evaluate(&css, None),
            Verdict::Accept {
                url: "https://cdn.example.com/site.css".to_string(),
                kind: ResourceKind::Stylesheet
            }
        );

        let icon = NodeSnapshot::element(3, "link")
            .with_attr("rel", "icon")
            .with_attr("href", "https://cdn.example.com/favicon.ico");
        assert_eq!(filter().evaluate(&icon, None), Verdict::Container);
    }

    #[test]
    fn test_frame_src_change_while_first_load_in_flight() {
        let frame = NodeSnapshot::element(1, "iframe").with_src("https://widgets.example.com/b");
        let loading = PriorWatch {
            url: "https://widgets.example.com/a",
            complete: false,
        };
        assert_eq!(
            filter().evaluate(&frame, Some(loading)),
            Verdict::Reject(Rejection::FrameSrcChanged)
        );

        // images swapping src mid-load are still followed
        let img = NodeSnapshot::image(2, "https://cdn.example.com/b.png");
        let loading = PriorWatch {
            url: "https://cdn.example.com/a.png",
            complete: false,
        };
        assert!(filter().is_interesting(&img, Some(loading)));
    }

    #[test]
    fn test_exclusion_policy() {
        let exclusions = UrlExclusions::new()
            .exclude_url("collector.example.com")
            .exclude_pattern(r"\.mp4$")
            .unwrap();
        let filter = ResourceFilter::new(exclusions);

        let beacon = NodeSnapshot::image(1, "https://collector.example.com/i?x=1");
        assert_eq!(filter.evaluate(&beacon, None), Verdict::Reject(Rejection::Excluded));
        assert!(filter.is_excluded("https://cdn.example.com/intro.mp4"));
        assert!(!filter.is_excluded("https://cdn.example.com/intro.webm"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let settings = ExclusionSettings {
            urls: Vec::new(),
            patterns: vec!["(unclosed".to_string()],
        };
        assert!(matches!(
            UrlExclusions::from_settings(&settings),
            Err(CorrelateError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_container_expands_to_images() {
        let card = NodeSnapshot::element(10, "div")
            .with_child(NodeSnapshot::image(11, "https://cdn.example.com/a.png"))
            .with_child(
                NodeSnapshot::element(12, "span")
                    .with_child(NodeSnapshot::image(13, "data:image/gif;base64,R0lG")),
            )
            .with_child(NodeSnapshot::element(14, "iframe").with_src("https://widgets.example.com/"))
            .with_child(NodeSnapshot::text(15));

        let found = filter().candidates(&card, |_| None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node, NodeId(11));
        assert_eq!(found[0].kind, ResourceKind::Image);
    }

    #[test]
    fn test_text_nodes_rejected() {
        assert_eq!(
            filter().evaluate(&NodeSnapshot::text(1), None),
            Verdict::Reject(Rejection::NotElement)
        );
        assert!(filter().candidates(&NodeSnapshot::text(1), |_| None).is_empty());
    }
}
