// Copyright (c) 2026 Isprava Engineering
//! agentrelay CLI — a thin binary crate; all testable logic lives in
//! `agentrelay-core`. Kept as a library target so integration tests can
//! exercise `main`'s wiring pieces directly.

pub mod startup;
