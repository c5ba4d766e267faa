//! Outbound wire to sources
//!
//! Delivery is fire-and-forget. Sources answer later through
//! [`crate::SafetyCenterService::set_safety_source_data`] or
//! [`crate::SafetyCenterService::report_safety_source_error`].

use sc_model::{BroadcastId, IssueKey, RequestType, UserId};
use serde::{Deserialize, Serialize};

/// Refresh request for the sources of one package and one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Receiving package
    pub package_name: String,
    /// Sources asked to answer
    pub source_ids: Vec<String>,
    /// Profile the sources answer for
    pub user_id: UserId,
    /// Fresh data or whatever is cached
    pub request_type: RequestType,
    /// Correlation id to echo back
    pub broadcast_id: BroadcastId,
}

/// Sends requests to sources; must not block
pub trait SourceTransport: Send + Sync {
    /// Ask sources to report
    fn send_refresh_request(&self, request: &RefreshRequest);

    /// Ask the source owning `issue` to run `action_id`
    fn send_issue_action(&self, package_name: &str, issue: &IssueKey, action_id: &str);
}

/// Transport that only logs what it would send
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

impl SourceTransport for LoggingTransport {
    fn send_refresh_request(&self, request: &RefreshRequest) {
        tracing::info!(
            "Refresh {} -> {} (user {}, {:?}): {}",
            request.broadcast_id,
            request.package_name,
            request.user_id,
            request.request_type,
            request.source_ids.join(",")
        );
    }

    fn send_issue_action(&self, package_name: &str, issue: &IssueKey, action_id: &str) {
        tracing::info!("Action {} of {} -> {}", action_id, issue, package_name);
    }
}
