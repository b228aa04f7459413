//! Combining independently started computations.
//!
//! Sibling fields and sibling list elements are joined the same way: each
//! computation is started on the runtime as soon as it is added, and the
//! combined result lists the outputs in insertion order.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};

enum Slot<T, E> {
    Ready(Result<T, E>),
    Started(JoinHandle<Result<T, E>>),
}

/// Collects started computations and joins them in order.
///
/// On the first observed failure the combined future resolves with that
/// failure. Computations still in flight are detached: they keep running and
/// their outcomes are discarded.
pub struct CombinedBuilder<T, E> {
    slots: Vec<Slot<T, E>>,
}

impl<T, E> CombinedBuilder<T, E>
where
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    /// Creates a builder expecting `capacity` computations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Starts `future` on the runtime and records its slot.
    pub fn add<F>(&mut self, future: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.slots.push(Slot::Started(tokio::spawn(future)));
    }

    /// Records an outcome that is already known.
    pub fn add_ready(&mut self, result: Result<T, E>) {
        self.slots.push(Slot::Ready(result));
    }

    /// Returns the number of recorded computations.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing was added.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Waits for every computation, or for the first failure.
    pub async fn await_all(self) -> Result<Vec<T>, E> {
        if self.slots.is_empty() {
            return Ok(Vec::new());
        }

        let mut values: Vec<Option<T>> = Vec::with_capacity(self.slots.len());
        let mut running = FuturesUnordered::new();

        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Slot::Ready(Ok(value)) => values.push(Some(value)),
                Slot::Ready(Err(error)) => return Err(error),
                Slot::Started(handle) => {
                    values.push(None);
                    running.push(async move { (index, handle.await) });
                }
            }
        }

        while let Some((index, joined)) = running.next().await {
            match joined {
                Ok(Ok(value)) => values[index] = Some(value),
                Ok(Err(error)) => return Err(error),
                Err(join_error) => return Err(E::from(join_error)),
            }
        }

        Ok(values.into_iter().flatten().collect())
    }
}

impl<T, E> Default for CombinedBuilder<T, E>
where
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Starts every future and joins them in order.
pub async fn join_ordered<I, F, T, E>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let futures = futures.into_iter();
    let mut builder = CombinedBuilder::with_capacity(futures.size_hint().0);
    for future in futures {
        builder.add(future);
    }
    builder.await_all().await
}
