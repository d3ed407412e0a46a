//! Integration test suite for Keyward.
//!
//! Exercises the secret store, selector and every keyring together, and
//! probes the air-gap protocol with hostile devices. Simulated devices and
//! fixtures live in [`helpers`].

pub mod helpers;
