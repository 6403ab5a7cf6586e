//! External data-source seams used by the searcher and extractor.
//!
//! Concrete connectors are supplied by the embedding application.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Bounds for one search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLimits {
    pub max_results: usize,
    pub timeout: Duration,
}

/// One hit from a search provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Provider-reported quality in [0, 1]; clamped on ingest.
    pub quality_score: f64,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>, quality_score: f64) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            quality_score,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }
}

/// Runs web or catalogue searches.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name recorded as the `source` of each result.
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limits: &SearchLimits)
        -> Result<Vec<SearchHit>, ProviderError>;
}

/// Bounds for one extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionLimits {
    /// Content beyond this many characters is dropped.
    pub max_chars: usize,
    pub timeout: Duration,
}

/// Text pulled from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub url: String,
    /// Empty when the page has no usable title.
    pub title: String,
    pub content: String,
}

impl ExtractedPage {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
        }
    }

    /// Length of the content in characters.
    pub fn content_length(&self) -> usize {
        self.content.chars().count()
    }
}

/// Fetches and cleans page content.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, url: &str, limits: &ExtractionLimits)
        -> Result<ExtractedPage, ProviderError>;
}
