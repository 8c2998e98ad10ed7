//! Persistence service integration

pub mod client;
pub mod profiles;
pub mod records;

pub use client::{PersistenceClient, StoreError};
pub use profiles::PilotProfileStore;
pub use records::RecordStore;
