//! Domain-specific job mappings, kept separate from the CORE (`kernel`)
//! they plug into.

pub mod jobs;
