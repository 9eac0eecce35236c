//! Executor 模块测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atp_common::CancellationToken;
use atp_executor::action::Nop;
use atp_executor::*;

#[test]
fn test_action_list_expansion() {
    let list: ActionCountList = "reboot,live_migrate:3,shelve".parse().unwrap();
    assert_eq!(list.total(), 5);
    assert_eq!(list.actions()[1..4], ["live_migrate"; 3]);
    assert_eq!(list.to_string(), "reboot,live_migrate:3,shelve");
}

#[test]
fn test_action_list_rejects_bad_tokens() {
    for input in ["", "reboot,,stop", "reboot:0", "reboot:x", ":2"] {
        let err = input.parse::<ActionCountList>().unwrap_err();
        assert!(matches!(err, ExecutorError::Config(_)), "{input}: {err}");
    }
}

#[test]
fn test_target_config_from_toml() {
    let config = TargetConfig::from_toml_str(
        r#"
        images = ["img-a", "img-b"]
        flavors = ["m1.small", "m1.medium"]
        networks = ["net-a"]
        workers = 4
        on_failure = "stop_target"

        [guest]
        enabled = true
        connect_timeout = 60

        [live_migrate]
        max_loss = 5
        "#,
    )
    .unwrap();

    assert_eq!(config.images.len(), 2);
    assert_eq!(config.workers, 4);
    assert_eq!(config.on_failure, FailureStrategy::StopTarget);
    assert!(config.guest.enabled);
    assert_eq!(config.guest.connect_timeout, 60);
    assert_eq!(config.live_migrate.max_loss, 5);
    // 未填写的字段取默认值
    assert_eq!(config.name_prefix, "atp-");
    assert!(config.cleanup);
    assert!(config.validate().is_ok());
    assert!(config.validate_for_create().is_ok());
}

#[test]
fn test_registry_checks_config_requirements() {
    let registry = ActionRegistry::builtin();
    let empty = TargetConfig::default();

    let list: ActionCountList = "reboot,stop,start".parse().unwrap();
    assert!(registry.validate(&list, &empty).is_ok());

    for needs_pool in ["resize", "rebuild", "attach_interface", "live_migrate_ping"] {
        let list: ActionCountList = needs_pool.parse().unwrap();
        assert!(
            matches!(registry.validate(&list, &empty), Err(ExecutorError::Config(_))),
            "{needs_pool}"
        );
    }

    let list: ActionCountList = "reboot,teleport".parse().unwrap();
    let err = registry.validate(&list, &empty).unwrap_err();
    assert!(err.to_string().contains("teleport"));
}

#[test]
fn test_register_custom_action() {
    let mut registry = ActionRegistry::builtin();
    assert!(registry.register("reboot", || Box::new(Nop)).is_err());
    registry.register("noop_alias", || Box::new(Nop)).unwrap();
    assert!(registry.contains("noop_alias"));
}

#[test]
fn test_ping_summary_parsing() {
    let iputils = "\
--- 10.0.0.5 ping statistics ---
150 packets transmitted, 147 received, 2% packet loss, time 29803ms";
    let summary = PingSummary::parse(iputils).unwrap();
    assert_eq!(summary.lost(), 3);

    let busybox = "5 packets transmitted, 5 packets received, 0% packet loss";
    assert_eq!(PingSummary::parse(busybox).unwrap().lost(), 0);
    assert!(PingSummary::parse("ping: unknown host").is_none());
}

#[test]
fn test_report_export() {
    let mut ok = TestTask::new("server-1", "vm-1");
    ok.finalize();
    let mut failed = TestTask::new("server-2", "vm-2");
    failed.fail("云主机不存在");

    let report = CaseReport::new("nightly", "reboot:2".into(), 2, 1500, vec![ok, failed]);
    assert!(report.has_failures());
    assert_eq!(report.summary.success, 1);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["summary"]["failed"], 1);
    assert_eq!(json["tasks"][0]["state"], "success");
    let yaml: serde_yaml::Value = serde_yaml::from_str(&report.to_yaml().unwrap()).unwrap();
    assert_eq!(yaml["actions"].as_str(), Some("reboot:2"));
}

#[tokio::test(start_paused = true)]
async fn test_task_group_bounds_concurrency() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let group = TaskGroup::new(3, CancellationToken::new());

    let results = {
        let running = running.clone();
        let peak = peak.clone();
        group
            .run((0..10).collect(), move |_, i: usize| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    if i % 4 == 0 {
                        Err(ExecutorError::assertion(format!("item {i}")))
                    } else {
                        Ok(i)
                    }
                }
            })
            .await
    };

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    let failed = results.iter().filter(|r| matches!(r, ItemOutcome::Failed(_))).count();
    assert_eq!(failed, 3);
    assert_eq!(results.iter().filter(|r| r.is_done()).count(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_task_store_notifies_waiters() {
    let store = TaskStore::new();
    let mut task = TestTask::new("server-1", "vm-1");
    store.add(task.clone());
    let version = store.version();

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move { store.wait_changed(version, Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    task.start();
    store.update(&task);

    let (new_version, tasks) = waiter.await.unwrap();
    assert!(new_version > version);
    assert_eq!(tasks[0].state, TaskState::Running);
}
