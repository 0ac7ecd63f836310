//! Thread selection policy.

pub(crate) mod rr;

pub(crate) use rr::RoundRobin;
