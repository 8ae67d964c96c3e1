use std::collections::HashSet;

use url::Url;

#[derive(Debug, Default)]
pub struct PrefetchRegistry {
    claimed: HashSet<String>,
}

impl PrefetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    pub fn claim(&mut self, href: &str, page_url: &str) -> Option<String> {
        let target = prefetch_target(href, page_url)?;
        if self.claimed.insert(target.clone()) {
            Some(target)
        } else {
            None
        }
    }
}

/// Same-origin http(s) navigations to a different document. Fragments are
/// dropped so `/about#team` and `/about` count as one document.
pub fn prefetch_target(href: &str, page_url: &str) -> Option<String> {
    let page = Url::parse(page_url).ok()?;
    let mut target = page.join(href.trim()).ok()?;

    if !matches!(target.scheme(), "http" | "https") {
        return None;
    }
    if target.origin() != page.origin() {
        return None;
    }

    target.set_fragment(None);
    let mut current = page;
    current.set_fragment(None);
    if target == current {
        return None;
    }

    Some(target.to_string())
}
