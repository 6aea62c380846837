//! Stack of release actions unwound on every exit path.

use burrow_core::error::Result;

type ReleaseFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Release actions registered as resources are acquired.
///
/// Actions run last-in first-out on [`CleanupStack::unwind`], or on drop if
/// the stack was never unwound. Every action runs even if an earlier one
/// fails.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(String, ReleaseFn)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the release action for a resource that was just acquired.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.actions.push((label.into(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run all actions in reverse order and return the first failure.
    pub fn unwind(mut self) -> Result<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some((label, action)) = self.actions.pop() {
            match action() {
                Ok(()) => tracing::debug!(action = %label, "Released"),
                Err(e) => {
                    tracing::warn!(action = %label, error = %e, "Release failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            let _ = self.release_all();
        }
    }
}
