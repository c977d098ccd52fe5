//! # Polling dedupe
//!
//! Shared bookkeeping for polling triggers. A [`PollingSource`] only knows how
//! to list vendor items; this module remembers what was already emitted and
//! filters each fetch down to the new items.
//!
//! Two strategies are supported:
//! - [`DedupeStrategy::TimeBased`]: items carry a timestamp and the store keeps
//!   the newest timestamp seen (`lastPoll`).
//! - [`DedupeStrategy::LastItem`]: items are listed newest first and the store
//!   keeps the id of the newest item (`lastItem`).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::framework::context::TriggerContext;
use crate::framework::error::PieceError;
use crate::framework::property::PropertyMap;
use crate::framework::trigger::{Trigger, TriggerStrategy};

pub const LAST_POLL_KEY: &str = "lastPoll";
pub const LAST_ITEM_KEY: &str = "lastItem";

/// Items returned by a test run
const TEST_ITEM_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeStrategy {
    TimeBased,
    LastItem,
}

/// One vendor item as seen by the dedupe logic
#[derive(Debug, Clone, PartialEq)]
pub struct PolledItem {
    pub epoch_millis: Option<i64>,
    pub id: Option<Value>,
    pub data: Value,
}

impl PolledItem {
    pub fn timed(epoch_millis: i64, data: Value) -> Self {
        Self {
            epoch_millis: Some(epoch_millis),
            id: None,
            data,
        }
    }

    pub fn keyed<I: Into<Value>>(id: I, data: Value) -> Self {
        Self {
            epoch_millis: None,
            id: Some(id.into()),
            data,
        }
    }
}

/// Cursor handed to the source so it can narrow the vendor query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollingFetch {
    pub last_fetch_epoch_millis: i64,
    pub last_item_id: Option<Value>,
}

#[async_trait]
pub trait PollingSource: Send + Sync {
    fn strategy(&self) -> DedupeStrategy;

    async fn items(
        &self,
        ctx: &TriggerContext,
        fetch: &PollingFetch,
    ) -> Result<Vec<PolledItem>, PieceError>;

    /// Upper bound on events emitted per poll
    fn max_items(&self) -> Option<usize> {
        None
    }
}

async fn load_last_poll(ctx: &TriggerContext) -> Result<i64, PieceError> {
    Ok(ctx
        .store
        .get(LAST_POLL_KEY)
        .await?
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}

async fn load_last_item(ctx: &TriggerContext) -> Result<Option<Value>, PieceError> {
    Ok(ctx.store.get(LAST_ITEM_KEY).await?.filter(|v| !v.is_null()))
}

fn truncate(mut items: Vec<Value>, max: Option<usize>) -> Vec<Value> {
    if let Some(max) = max {
        items.truncate(max);
    }
    items
}

/// Fetch, filter to unseen items and advance the stored cursor
pub async fn poll<S: PollingSource + ?Sized>(
    source: &S,
    ctx: &TriggerContext,
) -> Result<Vec<Value>, PieceError> {
    match source.strategy() {
        DedupeStrategy::TimeBased => {
            let last = load_last_poll(ctx).await?;
            let fetch = PollingFetch {
                last_fetch_epoch_millis: last,
                last_item_id: None,
            };
            let items = source.items(ctx, &fetch).await?;

            let newest = items
                .iter()
                .filter_map(|item| item.epoch_millis)
                .fold(last, i64::max);
            ctx.store.put(LAST_POLL_KEY, Value::from(newest)).await?;

            let fresh = items
                .into_iter()
                .filter(|item| item.epoch_millis.is_some_and(|ts| ts > last))
                .map(|item| item.data)
                .collect();
            Ok(truncate(fresh, source.max_items()))
        }
        DedupeStrategy::LastItem => {
            let last = load_last_item(ctx).await?;
            let fetch = PollingFetch {
                last_fetch_epoch_millis: 0,
                last_item_id: last.clone(),
            };
            let items = source.items(ctx, &fetch).await?;

            if let Some(newest_id) = items.first().and_then(|item| item.id.clone()) {
                ctx.store.put(LAST_ITEM_KEY, newest_id).await?;
            }

            let seen_at = last
                .as_ref()
                .and_then(|last| items.iter().position(|item| item.id.as_ref() == Some(last)));
            let fresh = items
                .into_iter()
                .take(seen_at.unwrap_or(usize::MAX))
                .map(|item| item.data)
                .collect();
            Ok(truncate(fresh, source.max_items()))
        }
    }
}

/// Seed the cursor so the first poll only reports items created afterwards
pub async fn on_enable<S: PollingSource + ?Sized>(
    source: &S,
    ctx: &TriggerContext,
) -> Result<(), PieceError> {
    match source.strategy() {
        DedupeStrategy::TimeBased => {
            ctx.store
                .put(LAST_POLL_KEY, Value::from(Utc::now().timestamp_millis()))
                .await
        }
        DedupeStrategy::LastItem => {
            let items = source.items(ctx, &PollingFetch::default()).await?;
            let newest = items
                .into_iter()
                .next()
                .and_then(|item| item.id)
                .unwrap_or(Value::Null);
            ctx.store.put(LAST_ITEM_KEY, newest).await
        }
    }
}

pub async fn on_disable(ctx: &TriggerContext) -> Result<(), PieceError> {
    ctx.store.delete(LAST_POLL_KEY).await?;
    ctx.store.delete(LAST_ITEM_KEY).await
}

/// Sample items for the flow builder; leaves the cursor untouched
pub async fn test<S: PollingSource + ?Sized>(
    source: &S,
    ctx: &TriggerContext,
) -> Result<Vec<Value>, PieceError> {
    let items = source.items(ctx, &PollingFetch::default()).await?;
    Ok(items
        .into_iter()
        .take(TEST_ITEM_LIMIT)
        .map(|item| item.data)
        .collect())
}

/// [`Trigger`] backed by a [`PollingSource`]
pub struct PollingTrigger<S> {
    name: String,
    display_name: String,
    description: String,
    props: PropertyMap,
    sample_data: Value,
    source: S,
}

impl<S: PollingSource> PollingTrigger<S> {
    pub fn new<N, D, E>(name: N, display_name: D, description: E, source: S) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        E: Into<String>,
    {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: description.into(),
            props: PropertyMap::new(),
            sample_data: Value::Null,
            source,
        }
    }

    pub fn with_props(mut self, props: PropertyMap) -> Self {
        self.props = props;
        self
    }

    pub fn with_sample_data(mut self, sample_data: Value) -> Self {
        self.sample_data = sample_data;
        self
    }
}

#[async_trait]
impl<S: PollingSource + 'static> Trigger for PollingTrigger<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn props(&self) -> PropertyMap {
        self.props.clone()
    }

    fn strategy(&self) -> TriggerStrategy {
        TriggerStrategy::Polling
    }

    fn sample_data(&self) -> Value {
        self.sample_data.clone()
    }

    async fn on_enable(&self, ctx: &TriggerContext) -> Result<(), PieceError> {
        on_enable(&self.source, ctx).await
    }

    async fn on_disable(&self, ctx: &TriggerContext) -> Result<(), PieceError> {
        on_disable(ctx).await
    }

    async fn run(&self, ctx: &TriggerContext) -> Result<Vec<Value>, PieceError> {
        poll(&self.source, ctx).await
    }

    async fn test(&self, ctx: &TriggerContext) -> Result<Vec<Value>, PieceError> {
        test(&self.source, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::auth::AuthValue;
    use crate::framework::store::{MemoryStore, Store};
    use crate::http::HttpClientFactory;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Source returning a canned list and recording the cursor it was given
    struct Canned {
        strategy: DedupeStrategy,
        items: Mutex<Vec<PolledItem>>,
        seen: Mutex<Vec<PollingFetch>>,
        max: Option<usize>,
    }

    impl Canned {
        fn new(strategy: DedupeStrategy, items: Vec<PolledItem>) -> Self {
            Self {
                strategy,
                items: Mutex::new(items),
                seen: Mutex::new(Vec::new()),
                max: None,
            }
        }

        fn set(&self, items: Vec<PolledItem>) {
            *self.items.lock().unwrap() = items;
        }
    }

    #[async_trait]
    impl PollingSource for Canned {
        fn strategy(&self) -> DedupeStrategy {
            self.strategy
        }

        async fn items(
            &self,
            _ctx: &TriggerContext,
            fetch: &PollingFetch,
        ) -> Result<Vec<PolledItem>, PieceError> {
            self.seen.lock().unwrap().push(fetch.clone());
            Ok(self.items.lock().unwrap().clone())
        }

        fn max_items(&self) -> Option<usize> {
            self.max
        }
    }

    fn ctx() -> TriggerContext {
        TriggerContext {
            auth: AuthValue::None,
            props: Default::default(),
            store: Arc::new(MemoryStore::new()),
            webhook_url: None,
            payload: None,
            http: HttpClientFactory::default(),
        }
    }

    fn keyed(id: i64) -> PolledItem {
        PolledItem::keyed(id, json!({ "id": id }))
    }

    fn timed(ts: i64) -> PolledItem {
        PolledItem::timed(ts, json!({ "ts": ts }))
    }

    #[tokio::test]
    async fn test_time_based_emits_only_newer_items() {
        let ctx = ctx();
        ctx.store.put(LAST_POLL_KEY, json!(100)).await.unwrap();
        let source = Canned::new(
            DedupeStrategy::TimeBased,
            vec![timed(150), timed(90), timed(100), timed(120)],
        );

        let events = poll(&source, &ctx).await.unwrap();
        assert_eq!(events, vec![json!({"ts": 150}), json!({"ts": 120})]);
        assert_eq!(ctx.store.get(LAST_POLL_KEY).await.unwrap(), Some(json!(150)));
        assert_eq!(source.seen.lock().unwrap()[0].last_fetch_epoch_millis, 100);

        // Nothing newer on the second run, cursor stays put
        let events = poll(&source, &ctx).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(ctx.store.get(LAST_POLL_KEY).await.unwrap(), Some(json!(150)));
    }

    #[tokio::test]
    async fn test_time_based_cursor_never_moves_backwards() {
        let ctx = ctx();
        ctx.store.put(LAST_POLL_KEY, json!(500)).await.unwrap();
        let source = Canned::new(DedupeStrategy::TimeBased, vec![timed(10)]);

        assert!(poll(&source, &ctx).await.unwrap().is_empty());
        assert_eq!(ctx.store.get(LAST_POLL_KEY).await.unwrap(), Some(json!(500)));
    }

    #[tokio::test]
    async fn test_last_item_first_poll_returns_everything() {
        let ctx = ctx();
        let source = Canned::new(DedupeStrategy::LastItem, vec![keyed(3), keyed(2), keyed(1)]);

        let events = poll(&source, &ctx).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(ctx.store.get(LAST_ITEM_KEY).await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_last_item_stops_at_known_id() {
        let ctx = ctx();
        let source = Canned::new(DedupeStrategy::LastItem, vec![keyed(3), keyed(2), keyed(1)]);
        poll(&source, &ctx).await.unwrap();

        source.set(vec![keyed(5), keyed(4), keyed(3), keyed(2)]);
        let events = poll(&source, &ctx).await.unwrap();
        assert_eq!(events, vec![json!({"id": 5}), json!({"id": 4})]);
        assert_eq!(ctx.store.get(LAST_ITEM_KEY).await.unwrap(), Some(json!(5)));
        assert_eq!(
            source.seen.lock().unwrap()[1].last_item_id,
            Some(json!(3))
        );
    }

    #[tokio::test]
    async fn test_last_item_empty_fetch_keeps_cursor() {
        let ctx = ctx();
        ctx.store.put(LAST_ITEM_KEY, json!(7)).await.unwrap();
        let source = Canned::new(DedupeStrategy::LastItem, vec![]);

        assert!(poll(&source, &ctx).await.unwrap().is_empty());
        assert_eq!(ctx.store.get(LAST_ITEM_KEY).await.unwrap(), Some(json!(7)));
    }

    #[tokio::test]
    async fn test_max_items_truncates() {
        let ctx = ctx();
        let mut source = Canned::new(
            DedupeStrategy::LastItem,
            (1..=10).rev().map(keyed).collect(),
        );
        source.max = Some(4);

        let events = poll(&source, &ctx).await.unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], json!({"id": 10}));
    }

    #[tokio::test]
    async fn test_enable_seeds_cursor_so_existing_items_are_skipped() {
        let ctx = ctx();
        let source = Canned::new(DedupeStrategy::LastItem, vec![keyed(2), keyed(1)]);

        on_enable(&source, &ctx).await.unwrap();
        assert_eq!(ctx.store.get(LAST_ITEM_KEY).await.unwrap(), Some(json!(2)));
        assert!(poll(&source, &ctx).await.unwrap().is_empty());

        let timed_ctx = self::ctx();
        let before = Utc::now().timestamp_millis();
        let timed_source = Canned::new(DedupeStrategy::TimeBased, vec![]);
        on_enable(&timed_source, &timed_ctx).await.unwrap();
        let stored = timed_ctx
            .store
            .get(LAST_POLL_KEY)
            .await
            .unwrap()
            .and_then(|v| v.as_i64())
            .unwrap();
        assert!(stored >= before);
    }

    #[tokio::test]
    async fn test_disable_clears_cursor_and_test_does_not_touch_it() {
        let ctx = ctx();
        let source = Canned::new(
            DedupeStrategy::LastItem,
            (1..=8).rev().map(keyed).collect(),
        );
        ctx.store.put(LAST_ITEM_KEY, json!(6)).await.unwrap();

        let sample = test(&source, &ctx).await.unwrap();
        assert_eq!(sample.len(), 5);
        assert_eq!(ctx.store.get(LAST_ITEM_KEY).await.unwrap(), Some(json!(6)));
        assert_eq!(source.seen.lock().unwrap()[0], PollingFetch::default());

        on_disable(&ctx).await.unwrap();
        assert_eq!(ctx.store.get(LAST_ITEM_KEY).await.unwrap(), None);
        assert_eq!(ctx.store.get(LAST_POLL_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_polling_trigger_adapter() {
        let trigger = PollingTrigger::new(
            "new_item",
            "New Item",
            "Fires for new items",
            Canned::new(DedupeStrategy::LastItem, vec![keyed(1)]),
        )
        .with_sample_data(json!({"id": 0}));

        assert_eq!(trigger.strategy(), TriggerStrategy::Polling);
        assert_eq!(trigger.sample_data(), json!({"id": 0}));

        let ctx = ctx();
        trigger.on_enable(&ctx).await.unwrap();
        assert!(trigger.run(&ctx).await.unwrap().is_empty());
        assert_eq!(trigger.test(&ctx).await.unwrap(), vec![json!({"id": 1})]);
    }
}
