//! Whole-pipeline tests: detect a divergence, repair it through the bus, and
//! revalidate clean.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use liveshift::events::memory::bus;
use liveshift::testkit::{CollectingProducer, MemStore, RecordingPool};
use liveshift::{
    cancel_pair, ConnPool, Direction, DoubleWritePool, Entity, EventProducer, FixerConsumer,
    Pattern, RecordStore, Scheduler, SharedPattern, SqlRecordStore, Validator,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Article {
    id: i64,
    v: String,
}

impl Entity for Article {
    const TABLE: &'static str = "articles";
    const COLUMNS: &'static [&'static str] = &["id", "v"];

    fn id(&self) -> i64 {
        self.id
    }

    fn equals(&self, other: &Self) -> bool {
        self == other
    }
}

fn article(id: i64, v: &str) -> Article {
    Article { id, v: v.into() }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn stores() -> (Arc<MemStore<Article>>, Arc<MemStore<Article>>) {
    (Arc::new(MemStore::new()), Arc::new(MemStore::new()))
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Validate src→dst once and return the emitted events.
async fn validate_once(
    src: &Arc<MemStore<Article>>,
    dst: &Arc<MemStore<Article>>,
    producer: Arc<dyn EventProducer>,
) -> anyhow::Result<()> {
    let (_handle, signal) = cancel_pair();
    Validator::new(
        src.clone() as Arc<dyn RecordStore<Article>>,
        dst.clone() as Arc<dyn RecordStore<Article>>,
        Direction::Src,
        producer,
    )
    .validate(signal)
    .await?;
    Ok(())
}

/// Detect divergence through the validator, repair through the bus and fixer
/// consumer, then revalidate and expect silence.
async fn detect_repair_revalidate(
    src: Arc<MemStore<Article>>,
    dst: Arc<MemStore<Article>>,
) -> anyhow::Result<()> {
    let (publisher, sub) = bus();
    validate_once(&src, &dst, Arc::new(publisher)).await?;

    let consumer = FixerConsumer::new(
        src.clone() as Arc<dyn RecordStore<Article>>,
        dst.clone() as Arc<dyn RecordStore<Article>>,
    );
    let (handle, signal) = cancel_pair();
    let run = tokio::spawn(async move { consumer.run(sub, signal).await });

    let converged = {
        let src = src.clone();
        let dst = dst.clone();
        move || src.ids() == dst.ids() && src.ids().iter().all(|id| src.get(*id) == dst.get(*id))
    };
    wait_for(converged).await;
    handle.cancel();
    run.await?;

    // a second sweep over the repaired stores must stay silent
    let check = Arc::new(CollectingProducer::new());
    validate_once(&src, &dst, check.clone() as Arc<dyn EventProducer>).await?;
    assert!(
        check.events().is_empty(),
        "revalidation after repair found {:?}",
        check.events()
    );
    Ok(())
}

#[tokio::test]
async fn missing_target_row_is_copied_over() -> anyhow::Result<()> {
    init_tracing();
    let (src, dst) = stores();
    src.insert(article(1, "a"));
    detect_repair_revalidate(src.clone(), dst.clone()).await?;
    assert_eq!(dst.get(1).map(|a| a.v), Some("a".into()));
    Ok(())
}

#[tokio::test]
async fn divergent_row_converges_to_the_authoritative_value() -> anyhow::Result<()> {
    init_tracing();
    let (src, dst) = stores();
    src.insert(article(2, "a"));
    dst.insert(article(2, "b"));
    detect_repair_revalidate(src.clone(), dst.clone()).await?;
    assert_eq!(dst.get(2).map(|a| a.v), Some("a".into()));
    Ok(())
}

#[tokio::test]
async fn orphan_in_target_is_deleted() -> anyhow::Result<()> {
    init_tracing();
    let (src, dst) = stores();
    dst.insert(article(3, "stray"));
    detect_repair_revalidate(src.clone(), dst.clone()).await?;
    assert!(dst.get(3).is_none());
    Ok(())
}

#[tokio::test]
async fn mixed_divergence_drains_in_one_pass() -> anyhow::Result<()> {
    init_tracing();
    let (src, dst) = stores();
    for id in 1..=40 {
        src.insert(article(id, "v"));
        match id % 4 {
            // consistent
            0 => dst.insert(article(id, "v")),
            // missing from target
            1 => {}
            // divergent value
            2 => dst.insert(article(id, "stale")),
            // plus an orphan the source never had
            _ => {
                dst.insert(article(id, "v"));
                dst.insert(article(id + 1000, "orphan"));
            }
        }
    }
    detect_repair_revalidate(src.clone(), dst.clone()).await?;
    assert_eq!(src.ids(), dst.ids());
    Ok(())
}

#[tokio::test]
async fn scheduler_drives_the_full_pipeline() -> anyhow::Result<()> {
    init_tracing();
    let (src, dst) = stores();
    src.insert(article(10, "keep"));
    dst.insert(article(10, "drift"));
    dst.insert(article(11, "orphan"));

    let (publisher, sub) = bus();
    let scheduler = Arc::new(Scheduler::new(
        src.clone() as Arc<dyn RecordStore<Article>>,
        dst.clone() as Arc<dyn RecordStore<Article>>,
        SharedPattern::default(),
        Arc::new(publisher) as Arc<dyn EventProducer>,
    ));
    scheduler.set_pattern(Pattern::SrcFirst);

    let consumer = FixerConsumer::new(
        src.clone() as Arc<dyn RecordStore<Article>>,
        dst.clone() as Arc<dyn RecordStore<Article>>,
    );
    let (handle, signal) = cancel_pair();
    let run = tokio::spawn(async move { consumer.run(sub, signal).await });

    scheduler.start_full();
    {
        let src = src.clone();
        let dst = dst.clone();
        wait_for(move || dst.get(10).map(|a| a.v) == src.get(10).map(|a| a.v) && dst.get(11).is_none())
            .await;
    }
    handle.cancel();
    run.await?;

    let status = scheduler.status();
    assert_eq!(status.pattern, Pattern::SrcFirst);
    assert_eq!(status.events.not_equal, 1);
    assert_eq!(status.events.base_missing, 1);
    Ok(())
}

#[tokio::test]
async fn dual_write_sends_every_statement_to_both_lanes() -> anyhow::Result<()> {
    init_tracing();
    let src = RecordingPool::new();
    let dst = RecordingPool::new();
    let pattern = SharedPattern::default();
    pattern.store(Pattern::SrcFirst);
    let pool = Arc::new(DoubleWritePool::new(
        Arc::new(src.clone()) as Arc<dyn ConnPool>,
        Arc::new(dst.clone()) as Arc<dyn ConnPool>,
        pattern,
    ));

    let store: SqlRecordStore<Article> = SqlRecordStore::new(pool as Arc<dyn ConnPool>);
    store.upsert(&article(1, "a"), Article::COLUMNS).await?;
    assert_eq!(src.exec_count(), 1);
    assert_eq!(dst.exec_count(), 1, "secondary lane received the write");

    // reads stay on the primary
    let _ = store.find_by_id(1).await?;
    assert_eq!(src.query_count(), 1);
    assert_eq!(dst.query_count(), 0);
    Ok(())
}
