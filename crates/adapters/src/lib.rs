// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![forbid(unsafe_code)]

//! Engine Adapter Set (C1) and Stream Normalizer (C2): the adapters
//! crate owns all I/O with external AI CLI subprocesses.

pub mod command_class;
pub mod engine;
pub mod env;
pub mod rpc;
pub mod stream;
pub mod traced;

pub use command_class::classify_command;
pub use engine::claude::{extract_process_name, ClaudeAdapter};
pub use engine::codex::CodexAdapter;
pub use engine::{
    Availability, AuthStatus, EngineAdapter, ExitOutcome, ManagedChild, ModelInfo, SpawnOptions,
    SpawnedProcess, AVAILABILITY_CACHE_TTL, AVAILABILITY_PROBE_TIMEOUT, CANCEL_HARD_KILL_DEADLINE,
};
pub use rpc::{RpcSession, CALL_TIMEOUT};
pub use stream::{normalize_stream, LineSplitter};
pub use traced::TracedAdapter;

#[cfg(any(test, feature = "test-support"))]
pub use engine::fake::{FakeAdapter, FakeCall};
