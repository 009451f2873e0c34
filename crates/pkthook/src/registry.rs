// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of hook heads keyed by `(HeadType, key)`.
//!
//! The registry serializes head create/destroy and lookup behind one mutex
//! that is never taken on the packet path; packet threads hold an
//! `Arc<HookHead>` obtained from [`HookRegistry::lookup`] and go straight
//! to the head's own lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::head::{HeadType, HookHead};
use crate::{Error, Result};

/// Set of interception points for one network instance.
///
/// Callers running several virtual network instances instantiate one
/// registry per instance; the registry takes no position on instancing.
pub struct HookRegistry<M, I, P> {
    heads: Mutex<HashMap<(HeadType, u64), Arc<HookHead<M, I, P>>>>,
}

impl<M, I, P> HookRegistry<M, I, P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heads: Mutex::new(HashMap::new()),
        }
    }

    /// Register an interception point.
    ///
    /// The caller keeps its own `Arc`; the registry holds another. The
    /// head's lists are reset so a re-registered head starts empty.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when a head with the same `(HeadType, key)` is
    /// registered.
    pub fn register_head(&self, head: Arc<HookHead<M, I, P>>) -> Result<()> {
        let key = (head.head_type(), head.key());
        let mut heads = self.heads.lock();
        if heads.contains_key(&key) {
            return Err(Error::AlreadyExists);
        }
        head.drain();
        log::debug!("[registry] register_head type={:?} key={}", key.0, key.1);
        heads.insert(key, head);
        Ok(())
    }

    /// Unregister an interception point and release every remaining hook.
    ///
    /// The caller promises no dispatch is in flight on this head. Stale
    /// references held elsewhere stay valid but see an empty head.
    ///
    /// # Errors
    ///
    /// `NotRegistered` when this exact head is not in the registry.
    pub fn unregister_head(&self, head: &Arc<HookHead<M, I, P>>) -> Result<()> {
        let key = (head.head_type(), head.key());
        {
            let mut heads = self.heads.lock();
            match heads.get(&key) {
                Some(existing) if Arc::ptr_eq(existing, head) => {
                    heads.remove(&key);
                }
                _ => return Err(Error::NotRegistered),
            }
        }

        // The head is unlinked; drain it without the registry mutex.
        let released = head.drain();
        log::debug!(
            "[registry] unregister_head type={:?} key={} released={}",
            key.0,
            key.1,
            released
        );
        Ok(())
    }

    /// Head registered for `(head_type, key)`, if any.
    #[must_use]
    pub fn lookup(&self, head_type: HeadType, key: u64) -> Option<Arc<HookHead<M, I, P>>> {
        self.heads.lock().get(&(head_type, key)).cloned()
    }

    /// Number of registered heads.
    #[must_use]
    pub fn head_count(&self) -> usize {
        self.heads.lock().len()
    }
}

impl<M, I, P> Default for HookRegistry<M, I, P> {
    fn default() -> Self {
        Self::new()
    }
}
