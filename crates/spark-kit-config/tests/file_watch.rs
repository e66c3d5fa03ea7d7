//! 本地文件 → 监听分发 → 强类型绑定的端到端链路。

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use spark_kit_config::{
    ConfigBinding, ConfigResponse, Encoding, EventType, FileConfig, KvConfig, WatchDispatcher,
};
use spark_kit_metrics::{RecordingMetrics, ScopedMetrics};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize, PartialEq)]
struct Limits {
    qps: u32,
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// 跳过写入过程中读到的中间内容，直到出现期望的事件。
async fn next_matching(
    rx: &mut mpsc::Receiver<ConfigResponse>,
    expected: impl Fn(&ConfigResponse) -> bool,
) -> ConfigResponse {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("watch channel open");
            if expected(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event in time")
}

#[tokio::test(flavor = "multi_thread")]
async fn file_changes_reach_binding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("limits.json");
    std::fs::write(&path, r#"{"qps": 10}"#).expect("write");

    let source = FileConfig::new().with_item("limits", &path);
    let metrics = Arc::new(RecordingMetrics::new());
    let dispatcher =
        WatchDispatcher::with_metrics("limits", ScopedMetrics::new("config.", metrics.clone()));

    let binding: ConfigBinding<Limits> =
        ConfigBinding::load_from(&source, "limits", Encoding::Json).await.expect("initial");
    assert_eq!(binding.load().qps, 10);

    let _follow = binding.follow(dispatcher.subscribe());
    dispatcher.start_kv(&source).await.expect("watch file");

    std::fs::write(&path, r#"{"qps": 25}"#).expect("rewrite");
    assert!(eventually(|| binding.load().qps == 25).await);

    std::fs::write(&path, "{broken").expect("corrupt");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(binding.load().qps, 25);

    assert_eq!(metrics.counter("config.watch.new.cnt"), 1.0);
    assert!(metrics.counter("config.watch.update.cnt") >= 2.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn watchers_share_one_listener_and_report_removal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("banner.txt");
    std::fs::write(&path, "hello").expect("write");
    let source = FileConfig::new().with_item("banner", &path);

    let mut first = source.watch("banner").await.expect("first watch");
    let mut second = source.watch("banner").await.expect("second watch");

    std::fs::write(&path, "bonjour").expect("rewrite");
    for rx in [&mut first, &mut second] {
        let event = next_matching(rx, |e| e.value() == "bonjour").await;
        assert_eq!(event.event(), EventType::Put);
    }

    std::fs::remove_file(&path).expect("remove");
    let event = next_matching(&mut first, |e| e.event() != EventType::Put).await;
    assert_eq!(event.event(), EventType::Del);
    assert_eq!(event.value(), "");

    // 文件已删除，读取退回到监听期间缓存的内容。
    let cached = source.get("banner").await.expect("cached");
    assert_eq!(cached.value(), "bonjour");
}

#[tokio::test(flavor = "multi_thread")]
async fn recreated_file_reports_removal_then_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("motd.txt");
    std::fs::write(&path, "same").expect("write");
    let source = FileConfig::new().with_item("motd", &path);
    let mut rx = source.watch("motd").await.expect("watch");

    std::fs::remove_file(&path).expect("remove");
    std::fs::write(&path, "same").expect("recreate");

    let event = next_matching(&mut rx, |e| e.event() == EventType::Del).await;
    assert_eq!(event.value(), "");
    let event = next_matching(&mut rx, |e| e.value() == "same").await;
    assert_eq!(event.event(), EventType::Put);
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_subscriber_does_not_starve_active_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("counter.txt");
    std::fs::write(&path, "0").expect("write");
    let source = FileConfig::new().with_item("counter", &path);

    let mut active = source.watch("counter").await.expect("active watch");
    let _idle = source.watch("counter").await.expect("idle watch");

    for round in 1..=20 {
        let value = round.to_string();
        std::fs::write(&path, &value).expect("rewrite");
        next_matching(&mut active, |e| e.value() == value).await;
    }
    assert!(source.dropped_events("counter") > 0);
}
