//! A callback that points at a target object whose lifetime is owned by the
//! (out-of-scope) host object system. The socket never owns the target, only
//! a weak handle to it, and clears the callback rather than invoking it into
//! a freed target — §3 "Lifecycles and ownership", §9 "Callbacks
//! referencing framework objects".

use std::sync::Weak;

/// A boxed callback optionally anchored to a `Weak` handle.
///
/// `anchor: None` means the callback has no external target lifetime to
/// track (e.g. a plain Rust closure owned by the caller) and is always
/// considered alive. `anchor: Some(weak)` models a callback bound to a
/// script/host object: once `weak` can no longer upgrade, [`Callback::call`]
/// clears itself instead of invoking the (now-dangling) closure.
pub struct Callback<F: ?Sized> {
    anchor: Option<Weak<()>>,
    func: Box<F>,
}

impl<F: ?Sized> Callback<F> {
    pub fn new(func: Box<F>) -> Self {
        Callback { anchor: None, func }
    }

    pub fn with_anchor(anchor: Weak<()>, func: Box<F>) -> Self {
        Callback { anchor: Some(anchor), func }
    }

    /// True while the callback's target (if any) is still alive.
    pub fn is_alive(&self) -> bool {
        match &self.anchor {
            Some(w) => w.strong_count() > 0,
            None => true,
        }
    }

    pub fn func_mut(&mut self) -> &mut F {
        &mut self.func
    }
}

/// Takes `slot`, checks the anchor, and if alive, runs `invoke` against the
/// callback, putting it back in `slot` afterward unless `invoke` clears it
/// or requests termination. Used at every callback call site so re-entrant
/// calls (the callback calling back into the socket) never observe a
/// `Some` slot that is concurrently being invoked.
pub fn invoke_and_restore<F: ?Sized>(
    slot: &mut Option<Callback<F>>,
    invoke: impl FnOnce(&mut F) -> bool,
) {
    let Some(mut cb) = slot.take() else { return };
    if !cb.is_alive() {
        return; // target destroyed; callback is dropped, slot stays None.
    }
    let keep = invoke(cb.func_mut());
    if keep {
        *slot = Some(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn dead_anchor_clears_without_invoking() {
        let anchor = Arc::new(());
        let weak = Arc::downgrade(&anchor);
        drop(anchor);

        let mut slot: Option<Callback<dyn FnMut() -> bool>> =
            Some(Callback::with_anchor(weak, Box::new(|| true)));
        let mut invoked = false;
        invoke_and_restore(&mut slot, |_f| {
            invoked = true;
            true
        });
        assert!(!invoked);
        assert!(slot.is_none());
    }

    #[test]
    fn live_anchor_invokes_and_restores() {
        let anchor = Arc::new(());
        let weak = Arc::downgrade(&anchor);

        let mut slot: Option<Callback<dyn FnMut() -> bool>> =
            Some(Callback::with_anchor(weak, Box::new(|| true)));
        invoke_and_restore(&mut slot, |f| f());
        assert!(slot.is_some());
        drop(anchor);
    }

    #[test]
    fn returning_false_clears_the_callback() {
        let mut slot: Option<Callback<dyn FnMut() -> bool>> =
            Some(Callback::new(Box::new(|| false)));
        invoke_and_restore(&mut slot, |f| f());
        assert!(slot.is_none());
    }
}
