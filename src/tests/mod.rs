//! Scheduler-level tests.
//!
//! libtest runs every test on its own OS thread, and every OS thread gets
//! its own per-core scheduler, so tests never see each other's threads.
//! A panic inside a cooperative thread aborts the test binary: threads
//! record what they observe and the test asserts from the scheduler context.

mod helpers;
