use anyhow::Result;

use crate::page::Location;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Last href seen by the URL poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteState {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChange {
    pub from: String,
    pub to: Location,
}

/// Detects single-page-application navigation by comparing the polled href
/// against the last one seen. Sole owner of [`RouteState`].
#[derive(Debug, Clone)]
pub struct NavigationWatcher {
    route: RouteState,
}

impl NavigationWatcher {
    pub fn new(initial_href: impl Into<String>) -> Self {
        Self {
            route: RouteState {
                href: initial_href.into(),
            },
        }
    }

    pub fn route(&self) -> &RouteState {
        &self.route
    }

    /// Returns the change when `href` differs from the last poll. An
    /// unparsable href is an error and leaves the route untouched.
    pub fn poll(&mut self, href: &str) -> Result<Option<RouteChange>> {
        if self.route.href == href {
            return Ok(None);
        }

        let to = Location::parse(href)?;
        let from = std::mem::replace(&mut self.route.href, href.to_string());
        log_info!("url changed from {} to {}", from, href);
        Ok(Some(RouteChange { from, to }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_href_reports_nothing() {
        let mut watcher = NavigationWatcher::new("https://www.instagram.com/reels/");
        assert_eq!(watcher.poll("https://www.instagram.com/reels/").unwrap(), None);
    }

    #[test]
    fn change_updates_route_state() {
        let mut watcher = NavigationWatcher::new("https://www.instagram.com/reels/");
        let change = watcher
            .poll("https://www.instagram.com/explore/")
            .unwrap()
            .unwrap();
        assert_eq!(change.from, "https://www.instagram.com/reels/");
        assert_eq!(change.to.path(), "/explore/");
        assert_eq!(watcher.route().href, "https://www.instagram.com/explore/");
        assert_eq!(watcher.poll("https://www.instagram.com/explore/").unwrap(), None);
    }

    #[test]
    fn query_only_changes_count_as_navigation() {
        let mut watcher = NavigationWatcher::new("https://www.youtube.com/shorts/a");
        let change = watcher.poll("https://www.youtube.com/shorts/a?feature=share").unwrap();
        assert!(change.is_some());
    }

    #[test]
    fn invalid_href_keeps_previous_route() {
        let mut watcher = NavigationWatcher::new("https://www.youtube.com/");
        assert!(watcher.poll("::nonsense").is_err());
        assert_eq!(watcher.route().href, "https://www.youtube.com/");
    }
}
