//! Desired-state sources.
//!
//! A source yields registrations in the order the program declares them.
//! The order matters: it is the tie-break for the processing order.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;

use crate::error::Result;

use super::registration::Registration;

/// Ordered stream of resource registrations.
#[async_trait]
pub trait DesiredStateSource: Send {
    /// Returns the next registration, or `None` once the program is done.
    async fn next_registration(&mut self) -> Result<Option<Registration>>;

    /// Drains the source.
    async fn collect(&mut self) -> Result<Vec<Registration>> {
        let mut registrations = Vec::new();
        while let Some(registration) = self.next_registration().await? {
            registrations.push(registration);
        }
        Ok(registrations)
    }
}

/// Source over a fixed list of registrations.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pending: VecDeque<Registration>,
}

impl StaticSource {
    /// Creates a source yielding `registrations` in order.
    #[must_use]
    pub fn new(registrations: Vec<Registration>) -> Self {
        Self {
            pending: registrations.into(),
        }
    }

    /// Creates a source that yields nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl From<Vec<Registration>> for StaticSource {
    fn from(registrations: Vec<Registration>) -> Self {
        Self::new(registrations)
    }
}

#[async_trait]
impl DesiredStateSource for StaticSource {
    async fn next_registration(&mut self) -> Result<Option<Registration>> {
        Ok(self.pending.pop_front())
    }
}

/// Source fed by a running program over a channel.
///
/// The program is finished when every sender has been dropped.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: mpsc::Receiver<Registration>,
}

impl ChannelSource {
    /// Creates a connected sender and source pair.
    #[must_use]
    pub fn channel(buffer: usize) -> (mpsc::Sender<Registration>, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (sender, Self { receiver })
    }
}

#[async_trait]
impl DesiredStateSource for ChannelSource {
    async fn next_registration(&mut self) -> Result<Option<Registration>> {
        Ok(self.receiver.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_preserves_order() {
        let mut source = StaticSource::from(vec![
            Registration::custom("echo:index:Bucket", "a"),
            Registration::custom("echo:index:Bucket", "b"),
        ]);

        let names: Vec<String> = source
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();

        assert_eq!(names, vec!["a", "b"]);
        assert!(source.next_registration().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_channel_source_ends_when_senders_drop() {
        let (sender, mut source) = ChannelSource::channel(4);

        let program = tokio::spawn(async move {
            for name in ["first", "second", "third"] {
                sender
                    .send(Registration::custom("echo:index:Bucket", name))
                    .await
                    .unwrap();
            }
        });

        let registrations = source.collect().await.unwrap();
        program.await.unwrap();

        assert_eq!(registrations.len(), 3);
        assert_eq!(registrations[2].name, "third");
    }
}
