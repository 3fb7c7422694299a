//! The currently focused window's `(class, title)`, shared read-only by all
//! engines and mutated only by the compositor IPC task.
//!
//! The crate runs its core loop single-threaded and cooperative (see
//! `supervisor`), so a plain `RefCell` is sufficient: only the IPC task ever
//! takes `&mut`, and an engine's read of the snapshot happens entirely
//! within one non-suspending step, never interleaved with the writer.

use std::cell::RefCell;
use std::rc::Rc;

/// A focused window's application identifier and title. Either field may be
/// empty, e.g. before the first focus event has arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    pub class: String,
    pub title: String,
}

impl Window {
    pub fn new(class: impl Into<String>, title: impl Into<String>) -> Self {
        Window {
            class: class.into(),
            title: title.into(),
        }
    }

    /// True when both fields are empty -- predicates treat this as
    /// vacuously satisfied (spec.md 4.B).
    pub fn is_empty(&self) -> bool {
        self.class.is_empty() && self.title.is_empty()
    }
}

/// Single-writer/many-reader cell holding the latest focus snapshot.
#[derive(Debug, Default)]
pub struct WindowContext {
    inner: Rc<RefCell<Window>>,
}

impl WindowContext {
    pub fn new() -> Self {
        WindowContext {
            inner: Rc::new(RefCell::new(Window::default())),
        }
    }

    /// A cheap handle sharing the same underlying cell; used to hand engines
    /// and the IPC writer task references to the same state without an
    /// `Arc<Mutex<_>>`.
    pub fn handle(&self) -> WindowContextHandle {
        WindowContextHandle {
            inner: Rc::clone(&self.inner),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowContextHandle {
    inner: Rc<RefCell<Window>>,
}

impl WindowContextHandle {
    /// Reads whatever snapshot is current; staleness relative to the real
    /// focused window is tolerated by design (spec.md 4.B).
    pub fn snapshot(&self) -> Window {
        self.inner.borrow().clone()
    }

    /// Called only by the IPC task, on its own task, when a focus-change
    /// event arrives.
    pub fn update(&self, window: Window) {
        *self.inner.borrow_mut() = window;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_context_is_empty() {
        let ctx = WindowContext::new();
        assert!(ctx.handle().snapshot().is_empty());
    }

    #[test]
    fn update_is_visible_to_all_handles() {
        let ctx = WindowContext::new();
        let reader = ctx.handle();
        let writer = ctx.handle();

        writer.update(Window::new("firefox", "Example Domain"));

        let snap = reader.snapshot();
        assert_eq!(snap.class, "firefox");
        assert_eq!(snap.title, "Example Domain");
    }
}
