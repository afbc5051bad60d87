//! Company resolution and employee discovery.
//!
//! [`CompanyResolver`] turns a name and/or domain into a canonical company.
//! [`EmployeeDiscoverer`] walks the people provider's active-employee listing
//! for that company and yields only profiles whose current position is
//! confirmed to be there.

mod employees;
mod employer;
mod resolver;

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

pub use employees::{
    DiscoveredEmployee, EmployeeDiscoverer, EmployeeStream, Rejection, RejectionReason,
    validate_employment,
};
pub use employer::{EmployerMatcher, normalize_employer, parse_start_date};
pub use resolver::{CompanyResolver, normalize_domain, select_candidate};

/// Provider calls (every attempt, failed ones included) and retries spent on
/// one unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUsage {
    pub company_calls: u32,
    pub people_calls: u32,
    pub retries: u32,
}

impl AddAssign for CallUsage {
    fn add_assign(&mut self, other: Self) {
        self.company_calls += other.company_calls;
        self.people_calls += other.people_calls;
        self.retries += other.retries;
    }
}
