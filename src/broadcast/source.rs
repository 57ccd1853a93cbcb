use anyhow::Result;
use async_trait::async_trait;

use super::model::Destination;

/// Chat registry view used by the engine. Implementations must only yield
/// eligible chats (see [`Destination::is_eligible`]).
#[async_trait]
pub trait DestinationSource: Send + Sync {
    async fn enumerate(&self) -> Result<Snapshot>;
}

/// Single-pass sequence of chat ids captured when the run starts.
#[derive(Debug)]
pub struct Snapshot {
    ids: std::vec::IntoIter<i64>,
}

impl Snapshot {
    pub fn new(ids: Vec<i64>) -> Self {
        Self {
            ids: ids.into_iter(),
        }
    }

    /// Build a snapshot from raw registry rows, dropping ineligible chats.
    pub fn from_destinations<I>(destinations: I) -> Self
    where
        I: IntoIterator<Item = Destination>,
    {
        let ids = destinations
            .into_iter()
            .filter(Destination::is_eligible)
            .map(|d| d.chat_id)
            .collect();
        Self::new(ids)
    }

    pub fn remaining(&self) -> usize {
        self.ids.len()
    }
}

impl Iterator for Snapshot {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        self.ids.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

/// In-memory registry, handy for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    destinations: Vec<Destination>,
}

impl StaticSource {
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self { destinations }
    }

    pub fn live_ids<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        Self::new(ids.into_iter().map(Destination::live).collect())
    }
}

#[async_trait]
impl DestinationSource for StaticSource {
    async fn enumerate(&self) -> Result<Snapshot> {
        Ok(Snapshot::from_destinations(self.destinations.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_filters_ineligible() {
        let source = StaticSource::new(vec![
            Destination::live(1),
            Destination {
                blocked: true,
                ..Destination::live(2)
            },
            Destination {
                live: false,
                ..Destination::live(3)
            },
            Destination::live(4),
        ]);
        let ids: Vec<i64> = source.enumerate().await.unwrap().collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn empty_registry_is_not_an_error() {
        let snapshot = StaticSource::default().enumerate().await.unwrap();
        assert_eq!(snapshot.remaining(), 0);
    }

    #[test]
    fn snapshot_is_single_pass() {
        let mut snapshot = Snapshot::new(vec![5, 6]);
        assert_eq!(snapshot.by_ref().count(), 2);
        assert_eq!(snapshot.next(), None);
    }
}
