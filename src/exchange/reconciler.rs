//! Order reconciler
//!
//! Keeps one canonical [`OrderRecord`] per exchange order. Two producers feed
//! it: REST acknowledgements/queries and the execution-report stream. Both go
//! through [`OrderReconciler::apply_update`], which merges field by field and
//! reports whether anything actually changed.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::messages::{OrderRecord, OrderRequest, OrderUpdate, UpdateSource};
use crate::common::errors::{Result, TradeError};
use crate::common::traits::ExchangeClient;
use crate::common::types::{Direction, OrderStatus};
use crate::config::types::ReconcilerConfig;

pub struct OrderReconciler {
    client: Arc<dyn ExchangeClient>,
    records: DashMap<String, OrderRecord>,
    config: ReconcilerConfig,
    /// Exchange account runs in hedge (dual position side) mode
    hedge_mode: bool,
}

impl OrderReconciler {
    pub fn new(client: Arc<dyn ExchangeClient>, config: ReconcilerConfig, hedge_mode: bool) -> Self {
        Self {
            client,
            records: DashMap::new(),
            config,
            hedge_mode,
        }
    }

    /// Submit a market order adding exposure in `direction`
    #[instrument(skip(self))]
    pub async fn create(&self, symbol: &str, direction: Direction, quantity: Decimal) -> Result<OrderRecord> {
        if quantity <= Decimal::ZERO {
            return Err(TradeError::Validation(format!(
                "order quantity {} must be positive",
                quantity
            )));
        }
        let request = OrderRequest::open(symbol, direction, quantity, self.hedge_mode);
        self.submit(&request).await
    }

    /// Submit a market order removing `quantity` of exposure in `direction`.
    ///
    /// Returns `None` when there is nothing left to close.
    #[instrument(skip(self))]
    pub async fn close(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
    ) -> Result<Option<OrderRecord>> {
        if quantity <= Decimal::ZERO {
            debug!(symbol, %direction, %quantity, "Nothing to close");
            return Ok(None);
        }
        let request = OrderRequest::close(symbol, direction, quantity, self.hedge_mode);
        self.submit(&request).await.map(Some)
    }

    /// Close everything an earlier opening order executed
    pub async fn close_record(&self, opened: &OrderRecord) -> Result<Option<OrderRecord>> {
        let direction = opened
            .position_direction
            .unwrap_or_else(|| Direction::from_open_side(opened.side));
        self.close(&opened.symbol, direction, opened.executed_qty).await
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderRecord> {
        let ack = self
            .bounded(&request.symbol, self.client.submit_order(request))
            .await?;
        if ack.status == OrderStatus::Rejected {
            warn!(order_id = %ack.order_id, symbol = %ack.symbol, "Order rejected by exchange");
            return Err(TradeError::OrderRejected(format!(
                "{} {} {} on {}",
                ack.order_id, request.side, request.quantity, request.symbol
            )));
        }

        info!(
            order_id = %ack.order_id,
            symbol = %ack.symbol,
            side = %ack.side,
            quantity = %ack.orig_qty,
            "Order submitted"
        );
        let stored = self.store(ack);
        Ok(stored)
    }

    /// Run one exchange call under the request deadline
    async fn bounded<T>(&self, subject: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = Duration::from_millis(self.config.request_timeout_ms);
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(subject, ?limit, "Exchange request timed out");
                Err(TradeError::Timeout(format!(
                    "exchange request for {} exceeded {}ms",
                    subject, self.config.request_timeout_ms
                )))
            }
        }
    }

    /// Insert a REST snapshot, merging it if the record already exists
    fn store(&self, record: OrderRecord) -> OrderRecord {
        let update = OrderUpdate::from_record(&record, UpdateSource::Rest);
        let entry = self
            .records
            .entry(record.order_id.clone())
            .and_modify(|existing| {
                existing.merge(&update);
            })
            .or_insert(record);
        entry.value().clone()
    }

    /// Local copy of an order
    pub fn get(&self, order_id: &str) -> Result<OrderRecord> {
        self.records
            .get(order_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| TradeError::OrderNotFound(order_id.to_string()))
    }

    /// Pull the exchange's view of an order and merge it
    pub async fn refresh(&self, symbol: &str, order_id: &str) -> Result<OrderRecord> {
        let fetched = self
            .bounded(order_id, self.client.fetch_order(symbol, order_id))
            .await?;
        if self.records.contains_key(order_id) {
            self.apply_update(OrderUpdate::from_record(&fetched, UpdateSource::Rest))
                .await;
            self.get(order_id)
        } else {
            Ok(self.store(fetched))
        }
    }

    /// Merge a partial update into the stored record.
    ///
    /// The stream can report an order before its REST acknowledgement has
    /// been stored; in that case the lookup is retried with exponential
    /// backoff and the update is dropped once the attempts run out.
    pub async fn apply_update(&self, update: OrderUpdate) -> bool {
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);

        for attempt in 0..=self.config.unknown_retry_attempts {
            if let Some(mut record) = self.records.get_mut(&update.order_id) {
                let changed = record.merge(&update);
                if changed {
                    debug!(
                        order_id = %update.order_id,
                        status = %record.status,
                        source = ?update.source,
                        "Order record updated"
                    );
                }
                return changed;
            }
            if attempt == self.config.unknown_retry_attempts {
                break;
            }
            debug!(order_id = %update.order_id, attempt, ?backoff, "Order not known yet, retrying");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }

        debug!(order_id = %update.order_id, "Dropping update for unknown order");
        false
    }

    /// Drop finished records older than `max_age`
    pub fn prune(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.status.is_terminal() && r.updated_at < cutoff));
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockExchangeClient;
    use crate::common::types::Side;
    use rust_decimal_macros::dec;

    fn ack(id: &str, request: &OrderRequest, status: OrderStatus) -> OrderRecord {
        let mut record = OrderRecord::new(id, request, Utc::now());
        record.status = status;
        record
    }

    fn reconciler(mock: MockExchangeClient) -> OrderReconciler {
        OrderReconciler::new(Arc::new(mock), ReconcilerConfig::default(), true)
    }

    #[tokio::test]
    async fn test_create_stores_record() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order()
            .times(1)
            .returning(|req| Ok(ack("42", req, OrderStatus::New)));
        let reconciler = reconciler(mock);

        let record = reconciler
            .create("BTCUSDT", Direction::Short, dec!(0.002))
            .await
            .unwrap();
        assert_eq!(record.side, Side::Sell);
        assert_eq!(record.position_direction, Some(Direction::Short));
        assert_eq!(reconciler.get("42").unwrap().orig_qty, dec!(0.002));
    }

    #[tokio::test]
    async fn test_rejected_order_is_an_error() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order()
            .returning(|req| Ok(ack("7", req, OrderStatus::Rejected)));
        let reconciler = reconciler(mock);

        let err = reconciler
            .create("BTCUSDT", Direction::Long, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::OrderRejected(_)));
        assert!(reconciler.is_empty());
    }

    #[tokio::test]
    async fn test_close_with_nothing_left_is_none() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order().never();
        let reconciler = reconciler(mock);

        let result = reconciler
            .close("BTCUSDT", Direction::Long, Decimal::ZERO)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_close_record_uses_executed_quantity() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order()
            .withf(|req| req.side == Side::Sell && req.quantity == dec!(0.003))
            .returning(|req| Ok(ack("2", req, OrderStatus::New)));
        let reconciler = reconciler(mock);

        let request = OrderRequest::open("BTCUSDT", Direction::Long, dec!(0.003), true);
        let mut opened = ack("1", &request, OrderStatus::Filled);
        opened.executed_qty = dec!(0.003);

        let close = reconciler.close_record(&opened).await.unwrap().unwrap();
        assert_eq!(close.order_id, "2");
    }

    #[tokio::test]
    async fn test_apply_update_reports_changes_only() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order()
            .returning(|req| Ok(ack("9", req, OrderStatus::New)));
        let reconciler = reconciler(mock);
        reconciler.create("ETHUSDT", Direction::Long, dec!(1)).await.unwrap();

        let fill = OrderUpdate {
            order_id: "9".into(),
            status: Some(OrderStatus::Filled),
            executed_qty: Some(dec!(1)),
            avg_price: Some(dec!(2500)),
            source: Some(UpdateSource::Stream),
            ..Default::default()
        };
        assert!(reconciler.apply_update(fill.clone()).await);
        assert!(!reconciler.apply_update(fill).await);
        assert!(reconciler.get("9").unwrap().is_filled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_update_waits_for_rest_ack() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order()
            .returning(|req| Ok(ack("5", req, OrderStatus::New)));
        let reconciler = reconciler(mock);

        let fill = OrderUpdate {
            order_id: "5".into(),
            status: Some(OrderStatus::Filled),
            source: Some(UpdateSource::Stream),
            ..Default::default()
        };
        let late_ack = async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            reconciler.create("BTCUSDT", Direction::Long, dec!(1)).await
        };

        let (changed, created) = tokio::join!(reconciler.apply_update(fill), late_ack);
        created.unwrap();
        assert!(changed);
        assert!(reconciler.get("5").unwrap().is_filled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_order_gives_up_after_backoff() {
        let reconciler = reconciler(MockExchangeClient::new());
        let started = tokio::time::Instant::now();

        let changed = reconciler
            .apply_update(OrderUpdate {
                order_id: "missing".into(),
                status: Some(OrderStatus::Filled),
                ..Default::default()
            })
            .await;

        assert!(!changed);
        // 100 + 200 + 400 + 800 + 1600
        assert_eq!(started.elapsed(), Duration::from_millis(3_100));
    }

    #[tokio::test]
    async fn test_refresh_merges_rest_state() {
        let mut mock = MockExchangeClient::new();
        mock.expect_submit_order()
            .returning(|req| Ok(ack("3", req, OrderStatus::New)));
        mock.expect_fetch_order().returning(|symbol, id| {
            let request = OrderRequest::open(symbol, Direction::Long, dec!(1), true);
            let mut record = OrderRecord::new(id, &request, Utc::now());
            record.status = OrderStatus::Filled;
            record.executed_qty = dec!(1);
            Ok(record)
        });
        let reconciler = reconciler(mock);
        reconciler.create("BTCUSDT", Direction::Long, dec!(1)).await.unwrap();

        let record = reconciler.refresh("BTCUSDT", "3").await.unwrap();
        assert!(record.is_filled());
        assert_eq!(record.remaining_qty(), Decimal::ZERO);
    }

    /// Exchange that accepts requests and never answers
    struct StalledExchange;

    #[async_trait::async_trait]
    impl ExchangeClient for StalledExchange {
        async fn submit_order(&self, _request: &OrderRequest) -> Result<OrderRecord> {
            std::future::pending().await
        }

        async fn fetch_order(&self, _symbol: &str, _order_id: &str) -> Result<OrderRecord> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_exchange_times_out() {
        let reconciler = OrderReconciler::new(Arc::new(StalledExchange), ReconcilerConfig::default(), true);
        let started = tokio::time::Instant::now();

        let err = reconciler
            .create("BTCUSDT", Direction::Long, dec!(0.002))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Timeout(_)));
        assert!(err.is_retryable());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(reconciler.is_empty());

        let err = reconciler.refresh("BTCUSDT", "1").await.unwrap_err();
        assert!(matches!(err, TradeError::Timeout(_)));
    }
}
