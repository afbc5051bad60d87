//! Company and people data providers.
//!
//! The discovery pipeline only sees the [`CompanyDataProvider`] and
//! [`PeopleDataProvider`] contracts. Concrete adapters:
//! - [`HttpCompanyProvider`] / [`HttpPeopleProvider`]: JSON over HTTP with bearer auth
//! - [`SnapshotProvider`]: an offline JSON dataset implementing both contracts
//!
//! [`Throttled`] wraps any provider in its own bounded worker pool.

mod contract;
mod http;
mod snapshot;
mod throttle;

pub use contract::{
    CollectedProfile, CompanyCandidate, CompanyDataProvider, ExperienceEntry, PeopleDataProvider,
    ProfileEmails, SearchPage,
};
pub use http::{HttpCompanyProvider, HttpPeopleProvider};
pub use snapshot::{SnapshotCompany, SnapshotDataset, SnapshotProvider};
pub use throttle::Throttled;
