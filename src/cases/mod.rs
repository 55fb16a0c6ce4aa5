/// Cases and competitive bidding
///
/// A case collects bids from at most `max_bidders` providers. The bidder
/// counter on the case row only moves through a conditional update, so the
/// cap holds under concurrent bidders.

mod manager;

pub use manager::CaseManager;

use crate::db::models::Case;
use serde::{Deserialize, Serialize};

/// New case request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCase {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_bidding")]
    pub bidding_enabled: bool,
    pub max_bidders: Option<i64>,
    /// Assign straight to this provider, skipping bidding
    pub provider_id: Option<String>,
}

fn default_bidding() -> bool {
    true
}

/// Bid request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBid {
    pub price: Option<i64>,
    pub comment: Option<String>,
}

/// A case together with the conversation opened for it, if any
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseOutcome {
    #[serde(flatten)]
    pub case: Case,
    pub conversation_id: Option<String>,
}
