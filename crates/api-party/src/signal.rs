//! Reactive cells.
//!
//! A [`Signal`] is a shared value that notifies watchers when it is replaced. A
//! [`Source`] is either a fixed value or a signal, which lets every binding option be
//! given statically or reactively.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable reactive value.
///
/// Clones share the same value. Every [`Signal::set`] or [`Signal::update`] wakes
/// the [`Trigger`]s obtained from it, even if the new value equals the old one.
///
/// # Examples
///
/// ```
/// use api_party::Signal;
///
/// let page = Signal::new(1);
/// let handle = page.clone();
/// handle.set(2);
/// assert_eq!(page.get(), 2);
/// ```
pub struct Signal<T> {
    value: Arc<watch::Sender<T>>,
    version: Arc<watch::Sender<u64>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            version: Arc::clone(&self.version),
        }
    }
}

impl<T: Clone> Signal<T> {
    /// Creates a signal holding `value`.
    pub fn new(value: T) -> Self {
        let (value, _) = watch::channel(value);
        let (version, _) = watch::channel(0);
        Self {
            value: Arc::new(value),
            version: Arc::new(version),
        }
    }

    /// The current value.
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Replaces the value and notifies watchers.
    pub fn set(&self, value: T) {
        self.value.send_replace(value);
        self.bump();
    }

    /// Modifies the value in place and notifies watchers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.value.send_modify(f);
        self.bump();
    }

    /// A receiver over the value itself.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// A change notification that does not carry the value.
    pub fn trigger(&self) -> Trigger {
        Trigger(self.version.subscribe())
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version = version.wrapping_add(1));
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&*self.value.borrow()).finish()
    }
}

/// Type-erased change notification from a [`Signal`].
#[derive(Debug, Clone)]
pub struct Trigger(watch::Receiver<u64>);

impl Trigger {
    /// Waits for the next change.
    ///
    /// Returns `false` once every handle to the signal is gone.
    pub async fn changed(&mut self) -> bool {
        self.0.changed().await.is_ok()
    }
}

/// A value given either statically or as a [`Signal`].
#[derive(Debug, Clone)]
pub enum Source<T> {
    /// A fixed value.
    Static(T),
    /// A reactive value.
    Signal(Signal<T>),
}

impl<T: Clone> Source<T> {
    /// The current value.
    pub fn get(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Signal(signal) => signal.get(),
        }
    }

    /// A change notification, or `None` for static values.
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Self::Static(_) => None,
            Self::Signal(signal) => Some(signal.trigger()),
        }
    }
}

impl<T: Default> Default for Source<T> {
    fn default() -> Self {
        Self::Static(T::default())
    }
}

impl<T> From<T> for Source<T> {
    fn from(value: T) -> Self {
        Self::Static(value)
    }
}

impl<T> From<Signal<T>> for Source<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl From<&str> for Source<String> {
    fn from(value: &str) -> Self {
        Self::Static(value.to_string())
    }
}
