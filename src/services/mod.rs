//! Clients for the external execution services

mod ability;

pub use ability::AbilityClient;
