pub mod diff;
pub mod queue;
pub mod read;
pub mod service;
pub mod worker;
pub mod writer;

pub use diff::{DesiredState, DiffEngine};
pub use queue::{FailedJob, JobChannel, QueueClosed};
pub use read::{EligibleOffer, OfferFeed, OfferQuery, ReadPath};
pub use service::{EligibilityService, ServiceConfig};
pub use worker::Worker;
pub use writer::TransactionalWriter;
