//! Parsing and reader configuration
//!
//! [ParseOptions] decides what happens when part of a publication is broken:
//! stop with an error, or record a diagnostic and keep going.
//! [ReaderConfig] carries the switches of [EpubReader](crate::reader::EpubReader).

use crate::error::{EpubError, ErrorCategory, ErrorCode};

/// How parse failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorHandlingStrategy {
    /// Any error aborts parsing
    #[default]
    Strict,

    /// Errors in the areas enabled by the `continue_on_*` flags are recorded and skipped
    Lenient,

    /// Every recoverable error is recorded and skipped
    BestEffort,
}

/// Options that control how tolerant parsing is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub strategy: ErrorHandlingStrategy,

    /// Keep warnings in the diagnostics, not only errors
    pub collect_warnings: bool,

    pub continue_on_metadata_error: bool,
    pub continue_on_navigation_error: bool,
    pub continue_on_resource_error: bool,

    /// Drop manifest items that are malformed instead of failing the manifest
    pub skip_invalid_resources: bool,

    /// Fill a missing title/language/identifier from the file name and defaults
    pub use_fallback_metadata: bool,

    /// Cap on the number of diagnostics kept
    pub max_warnings: usize,

    /// Errors whose message contains one of these are always skipped
    pub ignored_errors: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::strict()
    }
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            strategy: ErrorHandlingStrategy::Strict,
            collect_warnings: false,
            continue_on_metadata_error: false,
            continue_on_navigation_error: false,
            continue_on_resource_error: false,
            skip_invalid_resources: false,
            use_fallback_metadata: false,
            max_warnings: 100,
            ignored_errors: Vec::new(),
        }
    }

    pub fn lenient() -> Self {
        Self {
            strategy: ErrorHandlingStrategy::Lenient,
            collect_warnings: true,
            continue_on_metadata_error: true,
            continue_on_navigation_error: true,
            continue_on_resource_error: true,
            skip_invalid_resources: true,
            use_fallback_metadata: true,
            ..Self::strict()
        }
    }

    pub fn best_effort() -> Self {
        Self {
            strategy: ErrorHandlingStrategy::BestEffort,
            ..Self::lenient()
        }
    }

    /// Lenient parsing that keeps a large number of diagnostics
    pub fn debug() -> Self {
        Self {
            max_warnings: 1000,
            ..Self::lenient()
        }
    }

    pub fn with_strategy(mut self, strategy: ErrorHandlingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_warnings(mut self, max_warnings: usize) -> Self {
        self.max_warnings = max_warnings;
        self
    }

    pub fn ignore_error(mut self, pattern: impl Into<String>) -> Self {
        self.ignored_errors.push(pattern.into());
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strategy == ErrorHandlingStrategy::Strict
    }

    /// Whether the error message matches one of the ignored patterns
    pub fn is_ignored(&self, error: &EpubError) -> bool {
        if self.ignored_errors.is_empty() {
            return false;
        }

        let message = error.to_string();
        self.ignored_errors
            .iter()
            .any(|pattern| message.contains(pattern.as_str()))
    }

    /// Decides whether parsing goes on after `error`
    ///
    /// Strict parsing never continues. Ignored errors always do. Otherwise the
    /// error code picks the flag that applies: XML codes use the metadata flag,
    /// resource codes the resource flag, NCX/NAV codes the navigation flag.
    /// Everything else only continues in best effort mode.
    pub fn should_continue_on_error(&self, error: &EpubError) -> bool {
        if self.is_strict() {
            return false;
        }
        if self.is_ignored(error) {
            return true;
        }

        let best_effort = self.strategy == ErrorHandlingStrategy::BestEffort;
        let code = error.code();
        match code.category() {
            ErrorCategory::Xml => self.continue_on_metadata_error || best_effort,
            ErrorCategory::Resource => self.continue_on_resource_error || best_effort,
            _ if matches!(code, ErrorCode::EpubInvalidNcx | ErrorCode::EpubInvalidNav) => {
                self.continue_on_navigation_error || best_effort
            }
            _ => best_effort && error.is_recoverable(),
        }
    }
}

/// Switches of [EpubReader](crate::reader::EpubReader)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Reuse parsed books through the process-wide cache
    pub use_cache: bool,

    /// Only read chapter and resource data when asked for
    ///
    /// When disabled, [EpubReader::parse](crate::reader::EpubReader::parse)
    /// reads every spine document once so broken entries surface immediately.
    pub lazy_loading: bool,

    /// Process resources on a rayon thread pool
    pub parallel_processing: bool,

    pub parse_options: ParseOptions,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            lazy_loading: true,
            parallel_processing: false,
            parse_options: ParseOptions::default(),
        }
    }
}
