//! Transport over the shared pool and admission gate

use std::sync::Arc;

use async_trait::async_trait;
use nzbstream_pool::{
    AcquireContext, ConnectionManager, ConnectionPool, GatePermit, PooledConnection, PriorityGate,
};
use tracing::{debug, trace};

use super::{Article, ArticleConnection, SegmentTransport};
use crate::error::{TransportError, TransportResult};

/// [`SegmentTransport`] backed by a [`ConnectionPool`]
///
/// Every request first takes a permit from the [`PriorityGate`] in the
/// class given by the context, then a connection from the pool. Both honour
/// the context's reservation, so background requests never hold more than
/// `max_connections - reserved_slots` permits between them. A connection that fails with anything other
/// than "not found", or whose request is cancelled mid-flight, is destroyed
/// instead of returned.
pub struct PooledTransport<M: ConnectionManager> {
    pool: Arc<ConnectionPool<M>>,
    gate: Arc<PriorityGate>,
}

impl<M> PooledTransport<M>
where
    M: ConnectionManager,
    M::Connection: ArticleConnection,
{
    /// Transport over an existing pool and gate
    pub fn new(pool: Arc<ConnectionPool<M>>, gate: Arc<PriorityGate>) -> Self {
        Self { pool, gate }
    }

    /// Pool and gate sized from the pool's configuration
    pub fn from_pool(pool: ConnectionPool<M>) -> Self {
        let config = pool.config();
        let gate = PriorityGate::with_odds(config.max_connections, config.high_priority_odds);
        Self::new(Arc::new(pool), Arc::new(gate))
    }

    /// The underlying pool
    pub fn pool(&self) -> &Arc<ConnectionPool<M>> {
        &self.pool
    }

    /// The admission gate
    pub fn gate(&self) -> &Arc<PriorityGate> {
        &self.gate
    }

    async fn checkout(
        &self,
        ctx: &AcquireContext,
    ) -> TransportResult<(GatePermit<'_>, PooledConnection<M>)> {
        let permit = self
            .gate
            .acquire_reserving(ctx.priority(), ctx.reserved_slots, &ctx.cancel)
            .await?;
        let connection = self.pool.acquire(ctx.reserved_slots, &ctx.cancel).await?;
        Ok((permit, connection))
    }
}

/// Decide whether a connection survives the request it served
fn settle<M, T>(
    connection: &mut PooledConnection<M>,
    id: &str,
    outcome: Option<TransportResult<T>>,
) -> TransportResult<T>
where
    M: ConnectionManager,
{
    match outcome {
        None => {
            trace!("Request for {} cancelled, dropping connection", id);
            connection.mark_broken();
            Err(TransportError::Cancelled)
        }
        Some(Err(e)) if !e.is_not_found() => {
            debug!("Request for {} failed, dropping connection: {}", id, e);
            connection.mark_broken();
            Err(e)
        }
        Some(result) => result,
    }
}

#[async_trait]
impl<M> SegmentTransport for PooledTransport<M>
where
    M: ConnectionManager,
    M::Connection: ArticleConnection,
{
    async fn fetch_article(&self, id: &str, ctx: &AcquireContext) -> TransportResult<Article> {
        let (_permit, mut connection) = self.checkout(ctx).await?;
        let outcome = ctx.cancel.run_until_cancelled(connection.body(id)).await;
        settle(&mut connection, id, outcome)
    }

    async fn stat(&self, id: &str, ctx: &AcquireContext) -> TransportResult<bool> {
        let (_permit, mut connection) = self.checkout(ctx).await?;
        let outcome = ctx.cancel.run_until_cancelled(connection.stat(id)).await;
        settle(&mut connection, id, outcome)
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledTransport<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledTransport")
            .field("pool", &self.pool)
            .field("gate_available", &self.gate.available())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::ArticleHeader;
    use bytes::Bytes;
    use nzbstream_pool::{CancellationToken, PoolConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeConnection {
        served: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ArticleConnection for FakeConnection {
        async fn body(&mut self, id: &str) -> TransportResult<Article> {
            self.served.fetch_add(1, Ordering::SeqCst);
            match id {
                "missing" => Err(TransportError::NotFound(id.to_string())),
                "flaky" => Err(TransportError::Transient("connection reset".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    unreachable!("cancelled before completion")
                }
                _ => Ok(Article {
                    header: ArticleHeader::default(),
                    date: None,
                    body: Bytes::from(id.as_bytes().to_vec()),
                }),
            }
        }

        async fn stat(&mut self, id: &str) -> TransportResult<bool> {
            Ok(id != "missing")
        }
    }

    #[derive(Clone, Default)]
    struct Dialer {
        opened: Arc<AtomicUsize>,
        served: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionManager for Dialer {
        type Connection = FakeConnection;
        type Error = std::io::Error;

        async fn connect(&self) -> Result<FakeConnection, std::io::Error> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConnection {
                served: self.served.clone(),
            })
        }
    }

    fn transport(dialer: &Dialer) -> PooledTransport<Dialer> {
        PooledTransport::from_pool(ConnectionPool::new(dialer.clone(), PoolConfig::new(2)))
    }

    #[tokio::test]
    async fn test_connection_reused_after_success_and_not_found() {
        let dialer = Dialer::default();
        let transport = transport(&dialer);
        let ctx = AcquireContext::foreground(CancellationToken::new());

        let article = transport.fetch_article("a@b", &ctx).await.unwrap();
        assert_eq!(&article.body[..], b"a@b");
        let err = transport.fetch_article("missing", &ctx).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!transport.stat("missing", &ctx).await.unwrap());

        assert_eq!(dialer.opened.load(Ordering::SeqCst), 1);
        assert_eq!(transport.gate().available(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_destroys_connection() {
        let dialer = Dialer::default();
        let transport = transport(&dialer);
        let ctx = AcquireContext::background(CancellationToken::new(), 1);

        let err = transport.fetch_article("flaky", &ctx).await.unwrap_err();
        assert!(err.is_retryable());
        transport.fetch_article("a@b", &ctx).await.unwrap();
        assert_eq!(dialer.opened.load(Ordering::SeqCst), 2);
        assert_eq!(transport.pool().stats().live, 1);
    }

    #[tokio::test]
    async fn test_background_load_leaves_room_for_interactive_reads() {
        let dialer = Dialer::default();
        let transport = Arc::new(PooledTransport::from_pool(ConnectionPool::new(
            dialer.clone(),
            PoolConfig::new(3),
        )));
        let token = CancellationToken::new();
        let background = AcquireContext::background(token.clone(), 1);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let transport = transport.clone();
            let ctx = background.clone();
            tasks.push(tokio::spawn(async move { transport.fetch_article("slow", &ctx).await }));
        }
        while transport.gate().waiting().1 == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.pool().stats().live, 2);
        assert_eq!(transport.gate().available(), 1);

        let foreground = AcquireContext::foreground(CancellationToken::new());
        let article = tokio::time::timeout(
            Duration::from_millis(500),
            transport.fetch_article("a@b", &foreground),
        )
        .await
        .expect("interactive read should not wait behind background work")
        .unwrap();
        assert_eq!(&article.body[..], b"a@b");

        token.cancel();
        for task in tasks {
            assert!(task.await.unwrap().unwrap_err().is_cancelled());
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_request() {
        let dialer = Dialer::default();
        let transport = Arc::new(transport(&dialer));
        let token = CancellationToken::new();
        let ctx = AcquireContext::foreground(token.clone());

        let task = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.fetch_article("slow", &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(transport.pool().stats().live, 0);
        assert_eq!(transport.gate().available(), 2);
    }
}
