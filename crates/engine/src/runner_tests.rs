// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn host_path_passthrough_without_host_root() {
    let path = Path::new("/data/work/jobs/j1/repo");
    let mapped = resolve_docker_host_path(path, Path::new("/data/work"), None).unwrap();
    assert_eq!(mapped, PathBuf::from("/data/work/jobs/j1/repo"));
}

#[test]
fn host_path_is_rebased_onto_host_root() {
    let mapped = resolve_docker_host_path(
        Path::new("/data/work/jobs/j1/repo"),
        Path::new("/data/work"),
        Some(Path::new("/srv/host-work")),
    )
    .unwrap();
    assert_eq!(mapped, PathBuf::from("/srv/host-work/jobs/j1/repo"));
}

#[test]
fn host_path_root_itself_maps_to_host_root() {
    let mapped = resolve_docker_host_path(
        Path::new("/data/work"),
        Path::new("/data/work"),
        Some(Path::new("/srv/host-work")),
    )
    .unwrap();
    assert_eq!(mapped, PathBuf::from("/srv/host-work"));
}

#[test]
fn host_path_outside_work_dir_is_a_config_error() {
    let err = resolve_docker_host_path(
        Path::new("/elsewhere/repo"),
        Path::new("/data/work"),
        Some(Path::new("/srv/host-work")),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::PathOutsideRoot { .. }));
}

#[test]
fn container_config_path_is_anchored_in_the_project() {
    let resolved = resolve_container_config_path("mfb-build-override.ini").unwrap();
    assert_eq!(resolved, "/workspace/repo/mfb-build-override.ini");
}

#[test]
fn container_config_path_rejects_absolute_paths() {
    let err = resolve_container_config_path("/etc/passwd").unwrap_err();
    assert!(matches!(err, EngineError::ProjectConfigPath { .. }));
}

#[test]
fn container_config_path_rejects_traversal() {
    let err = resolve_container_config_path("../outside.ini").unwrap_err();
    assert!(matches!(err, EngineError::ProjectConfigPath { .. }));
    let err = resolve_container_config_path("ok/../../outside.ini").unwrap_err();
    assert!(matches!(err, EngineError::ProjectConfigPath { .. }));
}

#[test]
fn container_config_path_rejects_empty() {
    let err = resolve_container_config_path("   ").unwrap_err();
    assert!(matches!(err, EngineError::ProjectConfigPath { .. }));
}
