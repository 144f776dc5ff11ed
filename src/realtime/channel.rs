//! Channel registry and subscription handles

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::message::{ChangeEvent, ChangeFilter, ChangeKind};
use super::Inner;
use crate::error::Error;

/// A joined (or to-be-joined) channel
pub(crate) struct ChannelEntry {
    pub(crate) filter: ChangeFilter,
    pub(crate) events: mpsc::Sender<ChangeEvent>,
}

impl ChannelEntry {
    /// Hand an event to the subscriber. Returns `false` once the
    /// subscriber is gone.
    pub(crate) fn deliver(&self, topic: &str, event: ChangeEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("subscriber on {} is lagging, change dropped", topic);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Live change feed for one channel. Dropping it leaves the channel.
pub struct Subscription {
    topic: String,
    events: mpsc::Receiver<ChangeEvent>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub(crate) fn new(topic: String, events: mpsc::Receiver<ChangeEvent>, inner: Arc<Inner>) -> Self {
        Self {
            topic,
            events,
            inner,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next change, or `None` once the client has gone away
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Decode records as `T`
    pub fn typed<T: DeserializeOwned>(self) -> TypedSubscription<T> {
        TypedSubscription {
            subscription: self,
            _record: PhantomData,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("leaving {}", self.topic);
        self.inner.leave(&self.topic);
    }
}

/// A change with its record decoded
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub kind: ChangeKind,
    /// The row after the change; `None` for deletes
    pub record: Option<T>,
    /// The row before the change, as far as the table's replica identity
    /// exposes it
    pub old_record: Option<Value>,
    pub commit_timestamp: Option<String>,
}

/// [`Subscription`] that decodes every record
pub struct TypedSubscription<T> {
    subscription: Subscription,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSubscription<T> {
    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }

    /// Next change. A record that does not decode is reported as an error
    /// and the feed continues.
    pub async fn next(&mut self) -> Option<Result<Change<T>, Error>> {
        let event = self.subscription.next().await?;
        Some(event.record_as::<T>().map(|record| Change {
            kind: event.kind,
            record,
            old_record: event.old_record,
            commit_timestamp: event.commit_timestamp,
        }))
    }
}
