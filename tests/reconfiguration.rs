//! End-to-end replica set changes against scripted OSDs

mod common;

use common::{Harness, Invalidate, ScriptedOsds};
use minimrc::coordinator::classify::{Errno, ErrorType};
use minimrc::coordinator::xloc::UpdatePolicy;
use std::time::Duration;

const A: &str = "osd-a:32640";
const B: &str = "osd-b:32640";
const C: &str = "osd-c:32640";
const D: &str = "osd-d:32640";

#[tokio::test]
async fn test_add_replica_when_all_replicas_are_current() {
    let osds = ScriptedOsds::new();
    let versions = [(1, 5), (2, 3)];
    osds.reply(A, true, &versions);
    osds.reply(B, false, &versions);
    osds.reply(C, false, &versions);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let installed = h.add("vol:1", &[D]).await.unwrap();

    assert_eq!(installed.head_osds(), vec![A, B, C, D]);
    assert_eq!(installed.version(), 2);
    assert_eq!(osds.invalidated(), vec![A, B, C]);
    // Three of four already hold everything, which is a majority
    assert!(osds.fetched().is_empty());

    let file = h.file("vol:1").await;
    assert_eq!(file.xloc, installed);
    assert!(!h.lock("vol:1").await.is_locked());
}

#[tokio::test]
async fn test_add_replica_updates_stale_replicas() {
    let osds = ScriptedOsds::new();
    osds.reply(A, true, &[(1, 5), (2, 3)]);
    osds.reply(B, false, &[(1, 5), (2, 3)]);
    osds.reply(C, false, &[(1, 4), (2, 3)]);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let installed = h.add("vol:1", &[D]).await.unwrap();
    assert_eq!(installed.len(), 4);

    let fetched = osds.fetched();
    assert!(!fetched.is_empty());
    for call in &fetched {
        assert!(call.osd == C || call.osd == D, "unexpected update of {}", call.osd);
        assert_eq!(call.state.version_of(1).unwrap().version, 5);
        assert_eq!(call.state.version_of(1).unwrap().osd_uuids, vec![A, B]);
        // The new replica learns about itself through the proposed set
        assert_eq!(call.xloc_heads, vec![A, B, C, D]);
    }
}

#[tokio::test]
async fn test_quorum_unreachable_keeps_current_set() {
    let osds = ScriptedOsds::new();
    osds.reply(A, true, &[(1, 5)]);
    osds.script(B, Invalidate::Fail);
    osds.script(C, Invalidate::Fail);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let record = h.add("vol:1", &[D]).await.unwrap_err();
    assert_eq!(record.error_type, ErrorType::InternalServerError);
    assert!(osds.fetched().is_empty());

    let file = h.file("vol:1").await;
    assert_eq!(file.xloc.head_osds(), vec![A, B, C]);
    // Invalidated replicas must see a new version to revalidate
    assert_eq!(file.xloc.version(), 2);
    assert!(!h.lock("vol:1").await.is_locked());

    // The file can be changed again once the OSDs are back
    osds.reply(B, false, &[(1, 5)]);
    osds.reply(C, false, &[(1, 5)]);
    let installed = h.add("vol:1", &[D]).await.unwrap();
    assert_eq!(installed.version(), 3);
}

#[tokio::test]
async fn test_remove_replica_holding_latest_object() {
    let osds = ScriptedOsds::new();
    osds.reply(A, true, &[(5, 4)]);
    osds.reply(B, false, &[(5, 3)]);
    osds.reply(C, false, &[(5, 3)]);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let installed = h.remove("vol:1", A).await.unwrap();
    assert_eq!(installed.head_osds(), vec![B, C]);
    assert_eq!(installed.version(), 2);

    // Neither survivor is current and both are needed for a majority of two
    assert_eq!(osds.fetched_osds(), vec![B, C]);
    for call in osds.fetched() {
        let obj5 = call.state.version_of(5).unwrap();
        assert_eq!(obj5.version, 4);
        assert_eq!(obj5.osd_uuids, vec![A]);
        assert!(call.state.replicas_holding_all.is_empty());
        assert_eq!(call.xloc_heads, vec![A, B, C]);
    }
}

#[tokio::test]
async fn test_failed_update_abandons_change() {
    let osds = ScriptedOsds::new();
    osds.reply(A, true, &[(5, 4)]);
    osds.reply(B, false, &[(5, 3)]);
    osds.reply(C, false, &[(5, 3)]);
    osds.fail_fetches(C);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let record = h.remove("vol:1", A).await.unwrap_err();
    assert_eq!(record.error_type, ErrorType::InternalServerError);

    let file = h.file("vol:1").await;
    assert_eq!(file.xloc.head_osds(), vec![A, B, C]);
    assert_eq!(file.xloc.version(), 2);
    assert!(!h.lock("vol:1").await.is_locked());
}

#[tokio::test]
async fn test_read_only_files_skip_update() {
    let osds = ScriptedOsds::new();
    osds.script(B, Invalidate::Fail);
    let h = Harness::start(osds.clone());
    let file = h.create("ro", &[A, B], UpdatePolicy::ReadOnly).await;
    assert!(file.read_only);

    let installed = h.add("ro", &[C]).await.unwrap();
    assert_eq!(installed.head_osds(), vec![A, B, C]);
    assert!(osds.fetched().is_empty());
    assert!(h.file("ro").await.read_only);
}

#[tokio::test]
async fn test_primary_wait_is_bounded() {
    let osds = ScriptedOsds::new();
    osds.script(C, Invalidate::Hang);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::PrimaryBackupQuorum).await;

    let started = std::time::Instant::now();
    let installed = h.add("vol:1", &[D]).await.unwrap();
    assert_eq!(installed.len(), 4);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_change_in_progress_is_rejected() {
    let osds = ScriptedOsds::new();
    osds.script(C, Invalidate::Hang);
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let (first, second) = tokio::join!(h.add("vol:1", &[D]), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.remove("vol:1", B).await
    });

    assert_eq!(first.unwrap().len(), 4);
    let record = second.unwrap_err();
    assert_eq!(record.errno, Some(Errno::EAGAIN));
    assert_eq!(record.message, "xLocSet change already in progress. Please retry.");
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    let osds = ScriptedOsds::new();
    let h = Harness::start(osds.clone());
    h.create("f1", &[A, B], UpdatePolicy::Quorum).await;
    h.create("f2", &[C, D], UpdatePolicy::Quorum).await;

    let (first, second) = tokio::join!(h.add("f1", &["osd-e:32640"]), h.add("f2", &["osd-f:32640"]));
    assert_eq!(first.unwrap().len(), 3);
    assert_eq!(second.unwrap().len(), 3);

    let order = osds.invalidation_order();
    let last_f1 = order.iter().rposition(|o| o == A || o == B).unwrap();
    let first_f2 = order.iter().position(|o| o == C || o == D).unwrap();
    assert!(last_f1 < first_f2, "jobs interleaved: {:?}", order);
}

#[tokio::test]
async fn test_rejected_capability_is_permission_denied() {
    let osds = ScriptedOsds::new();
    for osd in [A, B, C] {
        osds.script(osd, Invalidate::Deny);
    }
    let h = Harness::start(osds.clone());
    h.create("vol:1", &[A, B, C], UpdatePolicy::Quorum).await;

    let record = h.remove("vol:1", C).await.unwrap_err();
    assert_eq!(record.error_type, ErrorType::Errno);
    assert_eq!(record.errno, Some(Errno::EPERM));
    assert!(!h.lock("vol:1").await.is_locked());
}

#[tokio::test]
async fn test_remove_last_replicas_of_read_only_file() {
    let osds = ScriptedOsds::new();
    let h = Harness::start(osds.clone());
    h.create("ro", &[A, B], UpdatePolicy::ReadOnly).await;

    let installed = h.remove("ro", B).await.unwrap();
    assert_eq!(installed.len(), 1);
    assert!(!h.file("ro").await.read_only);

    let record = h.remove("ro", A).await.unwrap_err();
    assert_eq!(record.errno, Some(Errno::EINVAL));
}
