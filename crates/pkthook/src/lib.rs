// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # pkthook - Packet Filter Hook Registry and Dispatch
//!
//! An in-stack coordination core that lets independent packet-filter modules
//! (firewalls, NAT engines, traffic classifiers, tunnel encapsulators)
//! cooperatively inspect and mutate packets at named interception points.
//! pkthook is a coordinator, not a filter: it owns no policy, parses no
//! packets, and performs no I/O. The surrounding stack decides where the
//! interception points live; pkthook keeps the ordered hook lists and runs
//! them fast.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use pkthook::{Direction, FilterArg, HeadType, HookHead, HookRegistry, HOOK_ALL};
//!
//! // Caller-chosen triplet: packet = Vec<u8>, interface = u32 ifindex, pcb = ().
//! fn drop_empty(
//!     _arg: &FilterArg,
//!     pkt: &mut Option<Vec<u8>>,
//!     _ifp: &u32,
//!     _dir: Direction,
//!     _pcb: &(),
//! ) -> i32 {
//!     if pkt.as_ref().map_or(false, |p| p.is_empty()) {
//!         *pkt = None; // consumed
//!     }
//!     0
//! }
//!
//! let registry: HookRegistry<Vec<u8>, u32, ()> = HookRegistry::new();
//! let head = Arc::new(HookHead::new(HeadType::Inet, 2));
//! registry.register_head(Arc::clone(&head))?;
//!
//! head.add_hook(drop_empty, Arc::new(()), HOOK_ALL)?;
//!
//! let mut pkt = Some(vec![0u8; 64]);
//! let verdict = head.run(&mut pkt, &1, Direction::Input, &());
//! assert_eq!(verdict, 0);
//! assert!(pkt.is_some());
//! # Ok::<(), pkthook::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Network Stack (caller)                      |
//! |        IPv4 input | IPv6 output | bridge forward | tunnels         |
//! +--------------------------------------------------------------------+
//! |                            Registry                                |
//! |          (HeadType, key) -> HookHead, create/destroy/lookup        |
//! +--------------------------------------------------------------------+
//! |                            HookHead                                |
//! |      input list | output list | nhooks, guarded by one RmLock      |
//! +--------------------------------------------------------------------+
//! |                          Dispatch engine                           |
//! |     shared-lock walk, verdicts, cookie skip-ahead re-injection     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`HookRegistry`] | Set of interception points keyed by `(HeadType, key)` |
//! | [`HookHead`] | One interception point with its two ordered hook lists |
//! | [`FilterFn`] | Filter callable invoked per packet |
//! | [`Direction`] | Selects the input or output list for one dispatch |
//! | [`Cookie`] | Nonzero tag for skip-ahead re-injection |
//!
//! ## Concurrency
//!
//! The per-packet path (`HookHead::run`/`run_inject`) takes only the head's
//! read-mostly lock in shared mode; reader acquisition is wait-free when no
//! writer contends and touches no globally shared cache line. Administrative
//! calls (add/remove) take the same lock exclusively and observe reader
//! quiescence first. The registry mutex is never taken on the packet path.
//!
//! pkthook is generic over an opaque triplet chosen by the caller: the packet
//! buffer handle `M`, the interface descriptor `I`, and the protocol control
//! block `P`. A single process may run several registries (one per virtual
//! network instance); pkthook takes no position on instancing.

/// Hook heads (interception points) and the dispatch engine.
pub mod head;
/// Hook records, cookie allocation, and the ordered per-direction lists.
pub mod hook;
/// Registry of hook heads keyed by `(HeadType, key)`.
pub mod registry;
/// Read-mostly lock used for per-head synchronization.
pub mod rmlock;

pub use head::{HeadType, HookHead};
pub use hook::{Cookie, FilterArg, FilterFn};
pub use registry::HookRegistry;

/// Operate on the input list.
pub const HOOK_INPUT: u8 = 0x01;
/// Operate on the output list.
pub const HOOK_OUTPUT: u8 = 0x02;
/// Operate on both lists (add/remove only).
pub const HOOK_ALL: u8 = HOOK_INPUT | HOOK_OUTPUT;
/// The allocator may block while growing a list (add only).
pub const HOOK_WAITOK: u8 = 0x04;

/// Priority for callers that do not care where their hook runs.
pub const ORDER_DEFAULT: u8 = 128;

/// Selects which hook list one dispatch walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receive path.
    Input,
    /// Send path.
    Output,
}

/// Errors returned by registry and hook administration operations.
///
/// Dispatch itself cannot fail: nonzero verdicts surfaced by
/// [`HookHead::run`] are filter verdicts, not pkthook errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A head with the same `(HeadType, key)` is already registered.
    AlreadyExists,
    /// A hook with the same `(function, context)` identity is already on the
    /// target list.
    AlreadyPresent,
    /// No hook with the `(function, context)` identity is on the target list.
    NotPresent,
    /// The head is not present in the registry.
    NotRegistered,
    /// The allocator could not satisfy a non-blocking request.
    OutOfMemory,
    /// Neither the input nor the output list was requested.
    BadFlags,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AlreadyExists => write!(f, "Head already registered for (type, key)"),
            Error::AlreadyPresent => write!(f, "Hook already present on list"),
            Error::NotPresent => write!(f, "Hook not present on list"),
            Error::NotRegistered => write!(f, "Head not registered"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::BadFlags => write!(f, "Flags select neither input nor output list"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
