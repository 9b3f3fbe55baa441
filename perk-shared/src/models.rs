use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel customer-type label meaning "every type registered for this merchant".
pub const ALL_CUSTOMER_TYPES: &str = "All";

/// The offer variants eligibility is materialized for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferKind {
    Cashback,
    Exclusive,
    Loyalty,
}

impl OfferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferKind::Cashback => "CASHBACK",
            OfferKind::Exclusive => "EXCLUSIVE",
            OfferKind::Loyalty => "LOYALTY",
        }
    }

    /// Parse a wire-level kind label. Returns None for kinds this engine
    /// does not know, which callers must treat as a malformed event.
    pub fn parse(label: &str) -> Option<OfferKind> {
        match label.to_ascii_uppercase().as_str() {
            "CASHBACK" => Some(OfferKind::Cashback),
            "EXCLUSIVE" => Some(OfferKind::Exclusive),
            "LOYALTY" => Some(OfferKind::Loyalty),
            _ => None,
        }
    }
}

impl std::fmt::Display for OfferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform eligibility capability shared by all offer kinds.
/// Loyalty synthesizes this from its active tiers rather than stored fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferDescriptor {
    pub eligible_customer_types: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OfferDescriptor {
    /// An offer participates in eligibility only while active and not soft-deleted
    pub fn is_live(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    pub fn wants_all_types(&self) -> bool {
        self.eligible_customer_types
            .iter()
            .any(|t| t == ALL_CUSTOMER_TYPES)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outlet {
    pub id: String,
    pub merchant_id: String,
    pub is_active: bool,
}

/// A user's customer type at one merchant. A user may hold a different
/// type per merchant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerType {
    pub user_id: String,
    pub merchant_id: String,
    pub type_label: String,
}

/// Materialized fact: (user, outlet) is eligible for (offer) within a window.
/// Existence IS eligibility; absent rows mean ineligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityRecord {
    pub id: Uuid,
    pub user_id: String,
    pub outlet_id: String,
    pub offer_type: OfferKind,
    pub offer_id: String,
    pub merchant_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// A row the diff engine wants created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEligibilityRecord {
    pub id: Uuid,
    pub user_id: String,
    pub outlet_id: String,
    pub offer_type: OfferKind,
    pub offer_id: String,
    pub merchant_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Validity-window change for a row whose identity is unchanged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: Uuid,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Minimal set of operations reconciling actual eligibility with desired
#[derive(Debug, Clone, Default)]
pub struct EligibilityDelta {
    pub to_create: Vec<NewEligibilityRecord>,
    pub to_update: Vec<RecordUpdate>,
    pub to_delete: Vec<Uuid>,
}

impl EligibilityDelta {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// Full offer payload the read path joins onto eligibility rows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPayload {
    pub id: String,
    pub offer_type: OfferKind,
    pub merchant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}
