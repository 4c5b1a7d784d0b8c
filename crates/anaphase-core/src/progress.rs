//! Page-load progress indicator.
//!
//! [`ProgressIndicator`] renders the bar and spinner styles.
//! [`NavigationProgress`] tracks route changes and decides when the bar
//! should be visible, delaying its start by `show_after`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default bar color.
pub const DEFAULT_COLOR: &str = "#2299DD";

/// Indicator options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressOptions {
    /// Bar, peg and spinner color.
    #[serde(default = "default_color")]
    pub color: String,
    /// Delay before the bar appears.
    #[serde(default)]
    pub show_after: Duration,
    /// Show the spinner next to the bar.
    #[serde(default = "default_true")]
    pub spinner: bool,
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            color: default_color(),
            show_after: Duration::ZERO,
            spinner: true,
        }
    }
}

impl ProgressOptions {
    /// Set the color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Set the start delay.
    pub fn with_show_after(mut self, delay: Duration) -> Self {
        self.show_after = delay;
        self
    }

    /// Show or hide the spinner.
    pub fn with_spinner(mut self, spinner: bool) -> Self {
        self.spinner = spinner;
        self
    }
}

/// Renders the indicator styles.
#[derive(Debug, Clone, Default)]
pub struct ProgressIndicator {
    options: ProgressOptions,
}

impl ProgressIndicator {
    /// Create an indicator.
    pub fn new(options: ProgressOptions) -> Self {
        Self { options }
    }

    /// Options in use.
    pub fn options(&self) -> &ProgressOptions {
        &self.options
    }

    /// Tracker for navigation events using these options.
    pub fn navigation(&self) -> NavigationProgress {
        NavigationProgress::new(self.options.show_after)
    }

    /// Indicator CSS.
    pub fn css(&self) -> String {
        let color = &self.options.color;
        let spinner = if self.options.spinner { "block" } else { "none" };
        format!(
            r#"#nprogress {{ pointer-events: none; }}
#nprogress .bar {{ background: {color}; position: fixed; z-index: 1031; top: 0; left: 0; width: 100%; height: 2px; }}
#nprogress .peg {{ display: block; position: absolute; right: 0px; width: 100px; height: 100%; box-shadow: 0 0 10px {color}, 0 0 5px {color}; opacity: 1; transform: rotate(3deg) translate(0px, -4px); }}
#nprogress .spinner {{ display: {spinner}; position: fixed; z-index: 1031; top: 15px; right: 15px; }}
#nprogress .spinner-icon {{ width: 18px; height: 18px; box-sizing: border-box; border: solid 2px transparent; border-top-color: {color}; border-left-color: {color}; border-radius: 50%; animation: nprogress-spinner 400ms linear infinite; }}
.nprogress-custom-parent {{ overflow: hidden; position: relative; }}
.nprogress-custom-parent #nprogress .spinner, .nprogress-custom-parent #nprogress .bar {{ position: absolute; }}
@keyframes nprogress-spinner {{ 0% {{ transform: rotate(0deg); }} 100% {{ transform: rotate(360deg); }} }}
"#
        )
    }
}

/// Visibility of the progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// No navigation in progress.
    Idle,
    /// Navigating, bar not shown yet.
    Pending,
    /// Navigating, bar shown.
    Visible,
}

/// Tracks route changes.
#[derive(Debug, Clone)]
pub struct NavigationProgress {
    show_after: Duration,
    started: Option<Instant>,
}

impl NavigationProgress {
    /// Create a tracker with the given start delay.
    pub fn new(show_after: Duration) -> Self {
        Self {
            show_after,
            started: None,
        }
    }

    /// A route change began. Restarts the delay if one was already pending.
    pub fn route_change_start(&mut self, now: Instant) {
        self.started = Some(now);
    }

    /// The route change finished.
    pub fn route_change_complete(&mut self) {
        self.started = None;
    }

    /// The route change failed. Treated like completion.
    pub fn route_change_error(&mut self) {
        self.route_change_complete();
    }

    /// Visibility at `now`.
    pub fn state(&self, now: Instant) -> ProgressState {
        match self.started {
            None => ProgressState::Idle,
            Some(started) if now.saturating_duration_since(started) >= self.show_after => {
                ProgressState::Visible
            }
            Some(_) => ProgressState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ProgressOptions::default();
        assert_eq!(options.color, "#2299DD");
        assert_eq!(options.show_after, Duration::ZERO);
        assert!(options.spinner);
    }

    #[test]
    fn test_css_uses_color_and_spinner() {
        let css = ProgressIndicator::new(ProgressOptions::default().with_color("#ff0000")).css();
        assert!(css.contains("background: #ff0000"));
        assert!(css.contains("display: block; position: fixed"));

        let css = ProgressIndicator::new(ProgressOptions::default().with_spinner(false)).css();
        assert!(css.contains("display: none"));
    }

    #[test]
    fn test_zero_delay_shows_immediately() {
        let mut nav = ProgressIndicator::default().navigation();
        let now = Instant::now();

        assert_eq!(nav.state(now), ProgressState::Idle);
        nav.route_change_start(now);
        assert_eq!(nav.state(now), ProgressState::Visible);
        nav.route_change_complete();
        assert_eq!(nav.state(now), ProgressState::Idle);
    }

    #[test]
    fn test_delayed_start() {
        let mut nav = NavigationProgress::new(Duration::from_millis(200));
        let start = Instant::now();

        nav.route_change_start(start);
        assert_eq!(nav.state(start + Duration::from_millis(100)), ProgressState::Pending);
        assert_eq!(nav.state(start + Duration::from_millis(200)), ProgressState::Visible);
    }

    #[test]
    fn test_fast_navigation_never_shows() {
        let mut nav = NavigationProgress::new(Duration::from_millis(200));
        let start = Instant::now();

        nav.route_change_start(start);
        nav.route_change_error();
        assert_eq!(nav.state(start + Duration::from_secs(1)), ProgressState::Idle);
    }

    #[test]
    fn test_restart_resets_delay() {
        let mut nav = NavigationProgress::new(Duration::from_millis(200));
        let start = Instant::now();

        nav.route_change_start(start);
        nav.route_change_start(start + Duration::from_millis(150));
        assert_eq!(nav.state(start + Duration::from_millis(250)), ProgressState::Pending);
    }
}
