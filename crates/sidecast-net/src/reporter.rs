//! Optional response reporter hook, matching `output_http.go`'s
//! `elasticSearch` field. Out of scope per spec.md's Non-goals
//! (response correctness assertions, no Elasticsearch integration
//! shipped by default), but the seam stays so an operator can plug one
//! in without touching the dispatch path.

use async_trait::async_trait;
use sidecast_core::Message;

#[async_trait]
pub trait ResponseReporter: Send + Sync {
    async fn report(&self, request: &Message, status: Option<u16>, latency: std::time::Duration);
}
