//! # Algorithms
//!
//! Event correlation strategies and inclusion polling.

pub mod correlation;
pub mod retry;

pub use correlation::{
    CancelHandle, CorrelationContext, DecodeFailure, DecodedEvent, EventWaiter, PollSource,
    PollingWaiter, SubscriptionSource, SubscriptionWaiter,
};
pub use retry::{await_inclusion, fetch_with_retry, TX_FETCH_ATTEMPTS, TX_FETCH_DELAY};
