use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

/// Recently seen update ids. Telegram redelivers webhooks it considers
/// unacknowledged, so the receiver claims each update_id once per window
/// and drops the rest on the floor.
#[derive(Clone)]
pub struct RecentUpdates {
    cache: Cache<i64, ()>,
}

impl RecentUpdates {
    pub fn new(window: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(window)
            .build();
        Self { cache }
    }

    /// True exactly once per update_id per window. The entry API makes
    /// the claim atomic under concurrent deliveries.
    pub async fn first_seen(&self, update_id: i64) -> bool {
        let entry = self.cache.entry(update_id).or_insert(()).await;
        let fresh = entry.is_fresh();
        if !fresh {
            debug!("Update {} already seen, suppressing redelivery", update_id);
        }
        fresh
    }

    /// Release a claim that did not lead to an enqueued job, so the
    /// gateway's redelivery is not suppressed.
    pub async fn forget(&self, update_id: i64) {
        self.cache.invalidate(&update_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_delivery_is_suppressed() {
        let seen = RecentUpdates::new(Duration::from_secs(60));
        assert!(seen.first_seen(100).await);
        assert!(!seen.first_seen(100).await);
        // A different update is unaffected.
        assert!(seen.first_seen(101).await);
    }

    #[tokio::test]
    async fn test_window_expiry_reopens_the_id() {
        let seen = RecentUpdates::new(Duration::from_millis(50));
        assert!(seen.first_seen(7).await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(seen.first_seen(7).await);
    }

    #[tokio::test]
    async fn test_forget_releases_a_claim() {
        let seen = RecentUpdates::new(Duration::from_secs(60));
        assert!(seen.first_seen(9).await);
        seen.forget(9).await;
        assert!(seen.first_seen(9).await);
    }

    #[tokio::test]
    async fn test_concurrent_claims_yield_one_winner() {
        let seen = RecentUpdates::new(Duration::from_secs(60));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let seen = seen.clone();
            handles.push(tokio::spawn(async move { seen.first_seen(42).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
