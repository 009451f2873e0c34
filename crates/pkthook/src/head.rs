// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hook heads: named interception points and the dispatch engine.
//!
//! A head owns two ordered hook lists (input and output) plus the entry
//! count, all guarded by one read-mostly lock. Dispatch walks a list in
//! shared mode; add/remove mutate in exclusive mode. Filters run with the
//! shared lock held and must not block indefinitely.

use std::sync::Arc;

use crate::hook::{fresh_cookie, Cookie, FilterArg, FilterFn, Hook, HookList};
use crate::rmlock::{ReadTracker, RmLock};
use crate::{Direction, Error, Result, HOOK_INPUT, HOOK_OUTPUT, HOOK_WAITOK, ORDER_DEFAULT};

/// Address-family class of an interception point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadType {
    /// IPv4 stack interception points.
    Inet,
    /// IPv6 stack interception points.
    Inet6,
    /// Link-layer (bridge, ethernet) interception points.
    Link,
}

pub(crate) struct HeadState<M, I, P> {
    pub(crate) input: HookList<M, I, P>,
    pub(crate) output: HookList<M, I, P>,
    pub(crate) nhooks: usize,
}

impl<M, I, P> HeadState<M, I, P> {
    const fn new() -> Self {
        Self {
            input: HookList::new(),
            output: HookList::new(),
            nhooks: 0,
        }
    }

    /// Fresh cookie not yet stamped on either list of this head.
    fn unique_cookie(&self) -> Cookie {
        loop {
            let cookie = fresh_cookie();
            if !self.input.contains_cookie(cookie) && !self.output.contains_cookie(cookie) {
                return cookie;
            }
        }
    }
}

/// A named interception point holding the input and output hook lists.
///
/// Heads are created by the caller, handed to
/// [`HookRegistry::register_head`](crate::HookRegistry::register_head), and
/// shared with packet threads as `Arc<HookHead>`.
pub struct HookHead<M, I, P> {
    head_type: HeadType,
    key: u64,
    pub(crate) state: RmLock<HeadState<M, I, P>>,
}

impl<M, I, P> HookHead<M, I, P> {
    #[must_use]
    pub fn new(head_type: HeadType, key: u64) -> Self {
        Self {
            head_type,
            key,
            state: RmLock::new(HeadState::new()),
        }
    }

    #[must_use]
    pub fn head_type(&self) -> HeadType {
        self.head_type
    }

    #[must_use]
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Register a filter at the default priority with a placeholder name.
    ///
    /// See [`add_hook_order`](Self::add_hook_order) for flags and errors.
    pub fn add_hook(&self, func: FilterFn<M, I, P>, arg: FilterArg, flags: u8) -> Result<()> {
        self.add_hook_order(func, arg, "unknown", flags, ORDER_DEFAULT)
    }

    /// Register a filter on the lists selected by `flags`.
    ///
    /// Flags: [`HOOK_INPUT`], [`HOOK_OUTPUT`] (at least one required,
    /// [`HOOK_ALL`](crate::HOOK_ALL) for both) and [`HOOK_WAITOK`] to allow
    /// the allocator to block. Each selected list gets its own hook record
    /// with its own cookie. If the output insertion fails after the input
    /// one succeeded, the input insertion is rolled back so the head is
    /// observably unchanged.
    ///
    /// # Errors
    ///
    /// `BadFlags` when neither list is selected, `AlreadyPresent` when the
    /// `(func, arg)` identity is already on a selected list, `OutOfMemory`
    /// when a non-blocking allocation fails.
    pub fn add_hook_order(
        &self,
        func: FilterFn<M, I, P>,
        arg: FilterArg,
        name: &str,
        flags: u8,
        order: u8,
    ) -> Result<()> {
        if flags & (HOOK_INPUT | HOOK_OUTPUT) == 0 {
            return Err(Error::BadFlags);
        }
        let wait_ok = flags & HOOK_WAITOK != 0;

        let mut state = self.state.write();
        if flags & HOOK_INPUT != 0 {
            let hook = Hook {
                func,
                arg: Arc::clone(&arg),
                name: name.to_string(),
                order,
                cookie: state.unique_cookie(),
            };
            state.input.insert(hook, Direction::Input, wait_ok)?;
            state.nhooks += 1;
        }
        if flags & HOOK_OUTPUT != 0 {
            let hook = Hook {
                func,
                arg: Arc::clone(&arg),
                name: name.to_string(),
                order,
                cookie: state.unique_cookie(),
            };
            if let Err(err) = state.output.insert(hook, Direction::Output, wait_ok) {
                if flags & HOOK_INPUT != 0 {
                    let _ = state.input.remove(func, &arg);
                    state.nhooks -= 1;
                }
                return Err(err);
            }
            state.nhooks += 1;
        }
        log::debug!(
            "[head] add_hook name='{}' order={} flags={:#04x} nhooks={}",
            name,
            order,
            flags,
            state.nhooks
        );
        Ok(())
    }

    /// Remove the filter matching `(func, arg)` from the lists selected by
    /// `flags`. A miss on the input list returns before the output list is
    /// touched.
    ///
    /// # Errors
    ///
    /// `BadFlags` when neither list is selected, `NotPresent` when a
    /// selected list has no matching hook.
    pub fn remove_hook(&self, func: FilterFn<M, I, P>, arg: &FilterArg, flags: u8) -> Result<()> {
        if flags & (HOOK_INPUT | HOOK_OUTPUT) == 0 {
            return Err(Error::BadFlags);
        }

        let mut state = self.state.write();
        if flags & HOOK_INPUT != 0 {
            let removed = state.input.remove(func, arg)?;
            state.nhooks -= 1;
            log::debug!(
                "[head] remove_hook name='{}' dir=input nhooks={}",
                removed.name(),
                state.nhooks
            );
        }
        if flags & HOOK_OUTPUT != 0 {
            let removed = state.output.remove(func, arg)?;
            state.nhooks -= 1;
            log::debug!(
                "[head] remove_hook name='{}' dir=output nhooks={}",
                removed.name(),
                state.nhooks
            );
        }
        Ok(())
    }

    /// Cookie of the hook matching `(func, arg)` on the list selected by
    /// `flags` (input wins when both are set), or 0 when absent.
    #[must_use]
    pub fn get_cookie(&self, func: FilterFn<M, I, P>, arg: &FilterArg, flags: u8) -> Cookie {
        let mut tracker = ReadTracker::new();
        let state = self.state.read(&mut tracker);
        if flags & HOOK_INPUT != 0 {
            state.input.find_cookie(func, arg)
        } else if flags & HOOK_OUTPUT != 0 {
            state.output.find_cookie(func, arg)
        } else {
            0
        }
    }

    /// Number of hooks across both lists.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        let mut tracker = ReadTracker::new();
        let nhooks = self.state.read(&mut tracker).nhooks;
        nhooks
    }

    /// Run the hooks for `dir` against the packet in `pkt`.
    ///
    /// Returns 0 when every hook passed the packet (or the packet was
    /// consumed), otherwise the aborting filter's verdict verbatim.
    #[must_use]
    pub fn run(&self, pkt: &mut Option<M>, iface: &I, dir: Direction, pcb: &P) -> i32 {
        self.run_inject(pkt, iface, dir, pcb, 0)
    }

    /// Like [`run`](Self::run), but with `cookie` nonzero the walk skips
    /// every hook up to and including the one stamped with that cookie,
    /// then resumes. A filter re-injecting a packet into its own head
    /// passes its own cookie so upstream filters are not re-run.
    ///
    /// # Performance
    /// HOT PATH: called for every packet crossing the interception point.
    /// Allocates nothing; holds the head's shared lock for the walk.
    #[must_use]
    pub fn run_inject(
        &self,
        pkt: &mut Option<M>,
        iface: &I,
        dir: Direction,
        pcb: &P,
        mut cookie: Cookie,
    ) -> i32 {
        let mut tracker = ReadTracker::new();
        let state = self.state.read(&mut tracker);
        debug_assert_eq!(state.nhooks, state.input.len() + state.output.len());
        let list = match dir {
            Direction::Input => &state.input,
            Direction::Output => &state.output,
        };

        let mut rv = 0;
        for hook in list.iter() {
            if cookie != 0 {
                // Still skipping; the matching hook itself is not re-run.
                if hook.cookie == cookie {
                    cookie = 0;
                }
                continue;
            }
            rv = (hook.func)(&hook.arg, pkt, iface, dir, pcb);
            if rv != 0 || pkt.is_none() {
                break;
            }
        }
        rv
    }

    /// Release every hook on both lists. Returns the number released.
    pub(crate) fn drain(&self) -> usize {
        let mut state = self.state.write();
        let released = state.nhooks;
        state.input.clear();
        state.output.clear();
        state.nhooks = 0;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HOOK_ALL;

    type Pkt = Vec<u8>;
    type Head = HookHead<Pkt, u32, ()>;

    fn nop(_arg: &FilterArg, _pkt: &mut Option<Pkt>, _ifp: &u32, _dir: Direction, _pcb: &()) -> i32 {
        0
    }

    fn other(
        _arg: &FilterArg,
        _pkt: &mut Option<Pkt>,
        _ifp: &u32,
        _dir: Direction,
        _pcb: &(),
    ) -> i32 {
        1
    }

    #[test]
    fn test_add_requires_direction_flag() {
        let head = Head::new(HeadType::Inet, 1);
        assert_eq!(
            head.add_hook(nop, Arc::new(()), HOOK_WAITOK),
            Err(Error::BadFlags)
        );
        assert_eq!(head.remove_hook(nop, &(Arc::new(()) as FilterArg), 0), Err(Error::BadFlags));
    }

    #[test]
    fn test_nhooks_counts_both_lists() {
        let head = Head::new(HeadType::Inet, 1);
        let arg: FilterArg = Arc::new(());
        head.add_hook(nop, Arc::clone(&arg), HOOK_ALL).unwrap();
        assert_eq!(head.hook_count(), 2);

        head.remove_hook(nop, &arg, HOOK_INPUT).unwrap();
        assert_eq!(head.hook_count(), 1);
        head.remove_hook(nop, &arg, HOOK_OUTPUT).unwrap();
        assert_eq!(head.hook_count(), 0);
    }

    #[test]
    fn test_combined_add_rolls_back_on_output_failure() {
        let head = Head::new(HeadType::Inet, 1);
        let arg: FilterArg = Arc::new(());

        // Prime the output list so the second half of the combined add fails.
        head.add_hook(nop, Arc::clone(&arg), HOOK_OUTPUT).unwrap();
        assert_eq!(
            head.add_hook(nop, Arc::clone(&arg), HOOK_ALL),
            Err(Error::AlreadyPresent)
        );

        // The input half must have been rolled back.
        assert_eq!(head.get_cookie(nop, &arg, HOOK_INPUT), 0);
        assert_eq!(head.hook_count(), 1);
    }

    #[test]
    fn test_remove_miss_on_input_leaves_output() {
        let head = Head::new(HeadType::Link, 1);
        let arg: FilterArg = Arc::new(());
        head.add_hook(nop, Arc::clone(&arg), HOOK_OUTPUT).unwrap();

        assert_eq!(head.remove_hook(nop, &arg, HOOK_ALL), Err(Error::NotPresent));
        assert_ne!(head.get_cookie(nop, &arg, HOOK_OUTPUT), 0);
        assert_eq!(head.hook_count(), 1);
    }

    #[test]
    fn test_get_cookie_prefers_input() {
        let head = Head::new(HeadType::Inet6, 1);
        let arg: FilterArg = Arc::new(());
        head.add_hook(nop, Arc::clone(&arg), HOOK_ALL).unwrap();

        let input = head.get_cookie(nop, &arg, HOOK_INPUT);
        let output = head.get_cookie(nop, &arg, HOOK_OUTPUT);
        assert_ne!(input, 0);
        assert_ne!(output, 0);
        assert_ne!(input, output);
        assert_eq!(head.get_cookie(nop, &arg, HOOK_ALL), input);
        assert_eq!(head.get_cookie(nop, &arg, 0), 0);
    }

    #[test]
    fn test_cookie_stable_for_hook_lifetime() {
        let head = Head::new(HeadType::Inet, 1);
        let arg: FilterArg = Arc::new(());
        head.add_hook(nop, Arc::clone(&arg), HOOK_INPUT).unwrap();
        head.add_hook(other, Arc::clone(&arg), HOOK_INPUT).unwrap();

        let first = head.get_cookie(nop, &arg, HOOK_INPUT);
        head.remove_hook(other, &arg, HOOK_INPUT).unwrap();
        assert_eq!(head.get_cookie(nop, &arg, HOOK_INPUT), first);
    }

    #[test]
    fn test_drain_releases_everything() {
        let head = Head::new(HeadType::Inet, 1);
        head.add_hook(nop, Arc::new(()), HOOK_ALL).unwrap();
        head.add_hook(other, Arc::new(()), HOOK_INPUT).unwrap();

        assert_eq!(head.drain(), 3);
        assert_eq!(head.hook_count(), 0);
    }
}
