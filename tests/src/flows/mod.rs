//! Cross-chain flows grouped by what they settle.

pub mod delivery;
pub mod failures;
pub mod flush;
pub mod rollback;
