use std::{fmt::Debug, ops::Deref, sync::Arc};

/// A cloneable handle that keeps a value alive for as long as any clone of it is held,
/// independent of whatever owns the original `Arc`.
///
/// `result_channel` uses this to resolve the channel/task/executive reference cycle noted in
/// the design notes: the channel never holds a strong reference back to its tasks, and the
/// transmit loop (a detached tokio task) holds a [`KeepAlive<Channel>`] instead of the channel
/// holding a join handle on the loop. When the loop exits the handle drops and the channel's
/// refcount falls the same way it would have if the loop had simply been a method call.
#[derive(Debug)]
pub struct KeepAlive<T: Debug + Send + Sync + 'static>(Arc<T>);

impl<T: Debug + Send + Sync + 'static> KeepAlive<T> {
    /// Wrap a value for keep-alive sharing.
    pub fn new(value: Arc<T>) -> Self {
        Self(value)
    }
}

impl<T: Debug + Send + Sync + 'static> Clone for KeepAlive<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Debug + Send + Sync + 'static> Deref for KeepAlive<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_the_same_underlying_allocation() {
        let inner = Arc::new(42_i32);
        let a = KeepAlive::new(Arc::clone(&inner));
        let b = a.clone();
        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
        assert_eq!(Arc::strong_count(&inner), 3); // inner + a + b
    }
}
