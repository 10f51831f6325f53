// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Consistent error formatting for castfetch.
//!
//! Provides utilities to format errors with actionable information including
//! possible causes, suggested fixes, and a link for help, plus the small set
//! of fatal conditions that end a run with a distinct exit code.

use std::fmt;

/// Issue tracker shown at the bottom of every fatal error.
pub const ISSUES_URL: &str = "https://github.com/castfetch/castfetch/issues";

/// Process exit codes. `78` follows sysexits.h for configuration errors.
pub mod exit_codes {
    /// Run finished (individual items may still have failed)
    pub const SUCCESS: i32 = 0;
    /// Unexpected fatal error
    pub const ERROR: i32 = 1;
    /// No candidate feed URL produced a usable feed
    pub const FEED_UNREACHABLE: i32 = 2;
    /// User answered "no" at the confirmation prompt
    pub const DECLINED: i32 = 3;
    /// Stopped by Ctrl+C
    pub const INTERRUPTED: i32 = 4;
    /// Configuration file missing, unreadable or invalid
    pub const CONFIG: i32 = 78;
}

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use castfetch::error::format_error;
///
/// let error = format_error(
///     "Could not load the feed",
///     &["The URL is not an RSS feed", "The server is down"],
///     &["Open the URL in a browser", "Retry in a few minutes"],
/// );
/// println!("{}", error);
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", ISSUES_URL));

    output
}

/// Formats a simple error with just a title and help link.
pub fn format_simple_error(title: &str) -> String {
    format!("[✗] {}\n\nNeed help? {}", title, ISSUES_URL)
}

/// Builder for constructing formatted error messages.
///
/// # Example
///
/// ```
/// use castfetch::error::ErrorBuilder;
///
/// let error = ErrorBuilder::new("Invalid configuration")
///     .cause("max_attempts is 0")
///     .fix("Set max_attempts to at least 1")
///     .build();
/// println!("{}", error);
/// ```
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Add a possible cause.
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Add a suggested fix.
    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

/// Conditions that end the whole run before or instead of downloading.
#[derive(Debug)]
pub enum FatalError {
    /// Configuration could not be loaded or failed validation
    Config(anyhow::Error),
    /// Every candidate feed URL failed
    FeedUnreachable { input: String, reason: String },
    /// Anything else (download directory, HTTP client setup)
    Other(anyhow::Error),
}

impl FatalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_codes::CONFIG,
            Self::FeedUnreachable { .. } => exit_codes::FEED_UNREACHABLE,
            Self::Other(_) => exit_codes::ERROR,
        }
    }

    /// Render for the terminal with causes and fixes.
    pub fn render(&self) -> String {
        match self {
            Self::Config(e) => ErrorBuilder::new("Invalid configuration")
                .cause(format!("{:#}", e))
                .fix("Check the JSON in castfetch.json or the file given with --config")
                .fix("Remove the offending field to fall back to its default")
                .build(),
            Self::FeedUnreachable { input, reason } => {
                ErrorBuilder::new(format!("Could not load a feed from {}", input))
                    .cause(reason.clone())
                    .cause("The address is not an RSS feed or iono.fm channel page")
                    .cause("Network connection is down")
                    .fix("Open the address in a browser to confirm it serves RSS")
                    .fix("Re-run with --log-level debug to see each URL tried")
                    .build()
            }
            Self::Other(e) => format_simple_error(&format!("{:#}", e)),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid configuration: {:#}", e),
            Self::FeedUnreachable { input, reason } => {
                write!(f, "feed unreachable ({}): {}", input, reason)
            }
            Self::Other(e) => write!(f, "{:#}", e),
        }
    }
}

impl std::error::Error for FatalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1", "Cause 2"], &["Fix 1", "Fix 2"]);

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("Possible causes:"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  - Cause 2"));
        assert!(error.contains("Try these fixes:"));
        assert!(error.contains("  1. Fix 1"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.contains(ISSUES_URL));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(error.contains("[✗] Empty test"));
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_error_builder_display() {
        let builder = ErrorBuilder::new("Display test").cause("Cause").fix("Fix");
        let error = format!("{}", builder);
        assert!(error.contains("[✗] Display test"));
        assert!(error.contains("  1. Fix"));
    }

    #[test]
    fn test_fatal_exit_codes() {
        let config = FatalError::Config(anyhow::anyhow!("max_attempts must be at least 1"));
        assert_eq!(config.exit_code(), 78);
        assert!(config.render().contains("max_attempts must be at least 1"));

        let feed = FatalError::FeedUnreachable {
            input: "https://iono.fm/c/1".into(),
            reason: "server responded with HTTP 404".into(),
        };
        assert_eq!(feed.exit_code(), exit_codes::FEED_UNREACHABLE);
        assert!(feed.render().contains("https://iono.fm/c/1"));

        assert_eq!(FatalError::Other(anyhow::anyhow!("boom")).exit_code(), 1);
    }
}
