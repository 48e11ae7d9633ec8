// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn repo_url_accepts_common_forms() {
    let accepted = [
        "https://github.com/example/firmware.git",
        "http://git.example.org/fw",
        "ssh://git@github.com/example/firmware.git",
        "git://example.com/firmware",
        "git@github.com:example/firmware.git",
        "builder@git.internal:team/fw",
    ];
    for url in accepted {
        assert_eq!(validate_repo_url(url), Ok(()), "should accept {url}");
    }
}

#[test]
fn repo_url_rejects_empty() {
    assert_eq!(validate_repo_url(""), Err(ValidateError::RepoUrlRequired));
    assert_eq!(validate_repo_url("   "), Err(ValidateError::RepoUrlRequired));
}

#[test]
fn repo_url_rejects_whitespace() {
    assert_eq!(
        validate_repo_url("https://github.com/a b"),
        Err(ValidateError::RepoUrlWhitespace)
    );
    assert_eq!(
        validate_repo_url("https://github.com/a\nb"),
        Err(ValidateError::RepoUrlWhitespace)
    );
}

#[test]
fn repo_url_rejects_file_scheme() {
    assert_eq!(
        validate_repo_url("file:///etc/passwd"),
        Err(ValidateError::RepoUrlMissingHost)
    );
    assert_eq!(
        validate_repo_url("file://host/etc/passwd"),
        Err(ValidateError::RepoUrlScheme)
    );
}

#[test]
fn repo_url_rejects_bare_scheme() {
    // "https://" has no host at all.
    assert!(validate_repo_url("https://").is_err());
}

#[test]
fn repo_url_rejects_traversal_and_relative_paths() {
    assert!(validate_repo_url("../../firmware").is_err());
    assert_eq!(
        validate_repo_url("https://example.com/../secret"),
        Err(ValidateError::RepoUrlPath)
    );
}

#[test]
fn repo_url_rejects_unknown_scheme() {
    assert_eq!(
        validate_repo_url("ftp://example.com/firmware"),
        Err(ValidateError::RepoUrlScheme)
    );
}

#[test]
fn ref_accepts_empty_and_typical_names() {
    assert_eq!(validate_ref(""), Ok(()));
    assert_eq!(validate_ref("main"), Ok(()));
    assert_eq!(validate_ref("feature/with-tag_1.0"), Ok(()));
    assert_eq!(validate_ref("v2.3.1"), Ok(()));
}

#[test]
fn ref_rejects_bad_characters_and_length() {
    assert_eq!(validate_ref("bad ref"), Err(ValidateError::RefCharacters));
    assert_eq!(validate_ref("ref~1"), Err(ValidateError::RefCharacters));
    let long = "a".repeat(129);
    assert_eq!(validate_ref(&long), Err(ValidateError::RefCharacters));
}

#[test]
fn device_accepts_typical_names() {
    assert_eq!(validate_device("tbeam-s3-core"), Ok(()));
    assert_eq!(validate_device("esp32/tbeam"), Ok(()));
}

#[test]
fn device_rejects_traversal_and_separators() {
    assert_eq!(validate_device(""), Err(ValidateError::DeviceRequired));
    assert_eq!(validate_device("../escape"), Err(ValidateError::DeviceTraversal));
    assert_eq!(validate_device("/abs"), Err(ValidateError::DeviceSeparators));
    assert_eq!(validate_device("trailing/"), Err(ValidateError::DeviceSeparators));
    assert_eq!(validate_device("bad name"), Err(ValidateError::DeviceCharacters));
}

#[test]
fn device_selection_rejects_double_slash() {
    assert_eq!(validate_device_selection("esp32/tbeam"), Ok(()));
    assert_eq!(validate_device_selection("a//b"), Err(ValidateError::DevicePath));
    assert_eq!(validate_device_selection("a/../b"), Err(ValidateError::DevicePath));
    assert_eq!(validate_device_selection("/abs"), Err(ValidateError::DevicePath));
}

#[test]
fn scp_like_requires_all_three_parts() {
    assert!(validate_repo_url("git@github.com:").is_err());
    assert!(validate_repo_url("@github.com:path").is_err());
    // Missing colon makes it fall through to URL parsing, which fails.
    assert!(validate_repo_url("git@github.com").is_err());
}
