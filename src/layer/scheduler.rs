//! Coalescing of update requests into a single deferred pass.

/// Callback invoked when a pass gets scheduled. The host is expected to call
/// `TileMapLayer::deferred_update` at its next idle point.
pub type UpdateHook = Box<dyn FnMut()>;

#[derive(Default)]
pub struct UpdateScheduler {
    pending: bool,
    hook: Option<UpdateHook>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hook(&mut self, hook: Option<UpdateHook>) {
        self.hook = hook;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Request a pass. Returns `true` if this call scheduled it.
    ///
    /// Requests are dropped while the layer is detached: entering the tree
    /// schedules a pass of its own.
    pub fn queue(&mut self, in_tree: bool) -> bool {
        if self.pending || !in_tree {
            return false;
        }
        self.pending = true;
        if let Some(hook) = self.hook.as_mut() {
            hook();
        }
        true
    }

    /// Mark a pass as pending without notifying the host.
    pub fn force(&mut self) {
        self.pending = true;
    }

    /// Consume the pending request.
    pub fn take(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }
}
