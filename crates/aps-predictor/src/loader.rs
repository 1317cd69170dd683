//! Source of content for preloads

use crate::prediction::RecommendedContent;
use aps_core::ServiceError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

/// Loads the payload behind a recommended item
///
/// Called from detached preload tasks; errors are logged there and never
/// reach the code that tracked the event.
#[async_trait]
pub trait ContentLoader: Send + Sync + Debug {
    /// Produce the value to cache under `item.cache_key`
    async fn load(&self, item: &RecommendedContent) -> Result<Value, ServiceError>;
}
