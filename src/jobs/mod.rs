//! Background work: embedding refresh and backlink propagation.

pub mod worker;

pub use worker::{Job, JobEvent, JobKind, JobPool};
