// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hook records, cookie allocation, and the ordered per-direction lists.
//!
//! A hook's identity on a list is the `(function, context)` pair; contexts
//! compare by allocation address, never by value. The input list is kept in
//! non-increasing priority order and the output list in non-decreasing
//! priority order, so a packet leaving through the output list and one
//! arriving through the input list pass the same filters in mirrored order.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Direction, Error, Result};

/// Opaque per-hook user context, handed to the filter on every invocation.
pub type FilterArg = Arc<dyn Any + Send + Sync>;

/// Nonzero tag stamped on a hook at registration, used for skip-ahead
/// re-injection. Zero is reserved to mean "no skipping".
pub type Cookie = u64;

/// Filter callable.
///
/// Returns 0 to pass the packet on to the next hook and nonzero to abort
/// dispatch with that verdict. The filter may replace the packet in the
/// slot; setting the slot to `None` marks the packet consumed and stops
/// dispatch with verdict 0.
pub type FilterFn<M, I, P> = fn(&FilterArg, &mut Option<M>, &I, Direction, &P) -> i32;

/// One registered packet filter hook.
pub struct Hook<M, I, P> {
    pub(crate) func: FilterFn<M, I, P>,
    pub(crate) arg: FilterArg,
    pub(crate) name: String,
    pub(crate) order: u8,
    pub(crate) cookie: Cookie,
}

impl<M, I, P> Hook<M, I, P> {
    /// Diagnostic label supplied at registration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registration priority.
    #[must_use]
    pub fn order(&self) -> u8 {
        self.order
    }

    /// Skip-ahead tag stamped at registration.
    #[must_use]
    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    #[inline]
    fn matches(&self, func: FilterFn<M, I, P>, arg: &FilterArg) -> bool {
        self.func as usize == func as usize && arg_id(&self.arg) == arg_id(arg)
    }
}

#[inline]
fn arg_id(arg: &FilterArg) -> usize {
    Arc::as_ptr(arg) as *const () as usize
}

/// Ordered hook list for one direction.
pub(crate) struct HookList<M, I, P> {
    hooks: Vec<Hook<M, I, P>>,
}

impl<M, I, P> HookList<M, I, P> {
    pub(crate) const fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Insert `hook` keeping the direction's ordering invariant.
    ///
    /// The input list runs highest priority first, newest first within an
    /// equal-priority run; the output list mirrors it. Without `wait_ok`
    /// the growth allocation must succeed immediately.
    pub(crate) fn insert(
        &mut self,
        hook: Hook<M, I, P>,
        dir: Direction,
        wait_ok: bool,
    ) -> Result<()> {
        if self
            .hooks
            .iter()
            .any(|h| h.matches(hook.func, &hook.arg))
        {
            return Err(Error::AlreadyPresent);
        }

        if wait_ok {
            self.hooks.reserve(1);
        } else if self.hooks.try_reserve(1).is_err() {
            return Err(Error::OutOfMemory);
        }

        let pos = match dir {
            Direction::Input => self.hooks.iter().position(|h| h.order <= hook.order),
            Direction::Output => self.hooks.iter().position(|h| h.order > hook.order),
        }
        .unwrap_or(self.hooks.len());
        self.hooks.insert(pos, hook);
        Ok(())
    }

    /// Remove the hook matching `(func, arg)`.
    pub(crate) fn remove(&mut self, func: FilterFn<M, I, P>, arg: &FilterArg) -> Result<Hook<M, I, P>> {
        match self.hooks.iter().position(|h| h.matches(func, arg)) {
            Some(pos) => Ok(self.hooks.remove(pos)),
            None => Err(Error::NotPresent),
        }
    }

    /// Cookie of the hook matching `(func, arg)`, or 0 if absent.
    pub(crate) fn find_cookie(&self, func: FilterFn<M, I, P>, arg: &FilterArg) -> Cookie {
        self.hooks
            .iter()
            .find(|h| h.matches(func, arg))
            .map_or(0, |h| h.cookie)
    }

    pub(crate) fn contains_cookie(&self, cookie: Cookie) -> bool {
        self.hooks.iter().any(|h| h.cookie == cookie)
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, Hook<M, I, P>> {
        self.hooks.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.hooks.clear();
    }
}

static COOKIE_SALT: AtomicU64 = AtomicU64::new(0);

/// Draw a fresh nonzero cookie.
///
/// Mixes the system clock with a process-wide counter through an LCG, so no
/// extra dependency is needed. Cookies only need uniqueness within one
/// head; the caller rejects values already stamped there.
pub(crate) fn fresh_cookie() -> Cookie {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let salt = COOKIE_SALT.fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed);

    let mut state = (now.as_nanos() as u64) ^ salt;
    loop {
        state = state.wrapping_mul(6_364_136_223_846_793_005);
        state = state.wrapping_add(1_442_695_040_888_963_407);
        let cookie = state ^ (state >> 29);
        if cookie != 0 {
            return cookie;
        }
    }
}
