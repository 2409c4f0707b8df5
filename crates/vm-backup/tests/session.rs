//! Tests for the snapshot-set lifecycle.
//!

use std::collections::BTreeMap;

use common::{component, file_spec};
use vm_backup::{
    CancelFlag, ProgressEvent, Reporter,
    catalog::Workload,
    cluster::NoClusterVolumes,
    provider::mock::MockProvider,
    session::{SessionError, SnapshotSession},
};

mod common;

fn workload(name: &str) -> Workload {
    Workload {
        id: format!("{name}-id"),
        name: name.to_string(),
    }
}

fn vm1_provider() -> MockProvider {
    let components = vec![
        component("VM1", vec![file_spec("E:\\Hyper-V\\VM1\\disk.vhdx", None, false)]),
        component("VM2", vec![file_spec("F:\\Hyper-V\\VM2\\disk.vhdx", None, false)]),
    ];
    let device_paths = BTreeMap::from([
        ("E:\\".to_string(), "\\\\?\\GLOBALROOT\\shadow1".to_string()),
        ("F:\\".to_string(), "\\\\?\\GLOBALROOT\\shadow2".to_string()),
    ]);

    MockProvider::new(components, device_paths)
}

fn with_reporter<T>(run: impl FnOnce(&mut Reporter<'_>) -> T) -> T {
    let mut on_progress = |_: &mut ProgressEvent| {};
    let mut reporter = Reporter::new(&mut on_progress, CancelFlag::new());
    run(&mut reporter)
}

#[test]
fn full_lifecycle_calls_provider_in_order() {
    let mut provider = vm1_provider();
    let workloads = [workload("VM1")];

    with_reporter(|reporter| {
        let session =
            SnapshotSession::begin(&mut provider, &NoClusterVolumes, &workloads, reporter)
                .unwrap();
        session.commit(reporter).unwrap();
    });

    assert_eq!(
        provider.log,
        vec![
            "initialize",
            "gather_metadata",
            "select_component(VM1)",
            "start_snapshot_set",
            "add_volume(E:\\)",
            "prepare_for_backup",
            "create_snapshots",
            "mark_component_succeeded(VM1)",
            "complete_backup",
            "delete_snapshot_set(force=true)",
        ]
    );
}

#[test]
fn device_paths_map_volumes_to_frozen_paths() {
    let mut provider = vm1_provider();
    let workloads = [workload("VM1"), workload("VM2")];

    with_reporter(|reporter| {
        let session =
            SnapshotSession::begin(&mut provider, &NoClusterVolumes, &workloads, reporter)
                .unwrap();

        let paths = session.device_paths().unwrap();
        assert_eq!(
            paths,
            BTreeMap::from([
                ("E:\\".to_string(), "\\\\?\\GLOBALROOT\\shadow1".to_string()),
                ("F:\\".to_string(), "\\\\?\\GLOBALROOT\\shadow2".to_string()),
            ])
        );

        session.commit(reporter).unwrap();
    });
}

#[test]
fn snapshot_failure_tears_the_set_down() {
    let mut provider = vm1_provider();
    provider.fail_on = Some("create_snapshots");
    let workloads = [workload("VM1")];

    let result = with_reporter(|reporter| {
        SnapshotSession::begin(&mut provider, &NoClusterVolumes, &workloads, reporter)
            .map(|_| ())
    });

    assert!(matches!(result, Err(SessionError::Provider(_))));
    assert_eq!(
        provider.log.last().unwrap(),
        "delete_snapshot_set(force=true)"
    );
}

#[test]
fn dropping_an_uncommitted_session_deletes_the_set() {
    let mut provider = vm1_provider();
    let workloads = [workload("VM1")];

    with_reporter(|reporter| {
        let session =
            SnapshotSession::begin(&mut provider, &NoClusterVolumes, &workloads, reporter)
                .unwrap();
        drop(session);
    });

    assert_eq!(
        provider.log.last().unwrap(),
        "delete_snapshot_set(force=true)"
    );
}

#[test]
fn no_matching_component_is_reported_before_any_set_exists() {
    let mut provider = vm1_provider();
    let workloads = [workload("VM99")];

    let result = with_reporter(|reporter| {
        SnapshotSession::begin(&mut provider, &NoClusterVolumes, &workloads, reporter)
            .map(|_| ())
    });

    assert!(matches!(result, Err(SessionError::NoComponentsSelected)));
    assert!(!provider.log.iter().any(|call| call == "start_snapshot_set"));
}

#[test]
fn shared_volume_is_added_once() {
    let components = vec![
        component("VM1", vec![file_spec("E:\\Hyper-V\\VM1\\disk.vhdx", None, false)]),
        component("VM2", vec![file_spec("E:\\Hyper-V\\VM2\\disk.vhdx", None, false)]),
    ];
    let device_paths = BTreeMap::from([(
        "E:\\".to_string(),
        "\\\\?\\GLOBALROOT\\shadow1".to_string(),
    )]);
    let mut provider = MockProvider::new(components, device_paths);
    let workloads = [workload("VM1"), workload("VM2")];

    with_reporter(|reporter| {
        let session =
            SnapshotSession::begin(&mut provider, &NoClusterVolumes, &workloads, reporter)
                .unwrap();
        session.commit(reporter).unwrap();
    });

    let add_volume_calls = provider
        .log
        .iter()
        .filter(|call| call.starts_with("add_volume"))
        .count();
    assert_eq!(add_volume_calls, 1);
}
