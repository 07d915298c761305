//! Pool and token onboarding with persistent quarantine lists.

pub mod blacklist;
pub mod pipeline;

pub use blacklist::{Blacklist, ListKind};
pub use pipeline::{Onboarding, OnboardingReport};
