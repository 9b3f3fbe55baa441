pub mod events;
pub mod models;

pub use events::{ChangeType, JobEnvelope, OfferChangeEvent};
pub use models::{
    ApplyCounts, CustomerType, EligibilityDelta, EligibilityRecord, NewEligibilityRecord,
    OfferDescriptor, OfferKind, OfferPayload, Outlet, RecordUpdate, ALL_CUSTOMER_TYPES,
};
