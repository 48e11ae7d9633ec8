// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn flags(options: &BuildOptions) -> Vec<&str> {
    options.build_flags.iter().map(String::as_str).collect()
}

fn deps(options: &BuildOptions) -> Vec<&str> {
    options.lib_deps.iter().map(String::as_str).collect()
}

// ---------------------------------------------------------------------------
// INI parsing
// ---------------------------------------------------------------------------

#[test]
fn parses_single_env_section() {
    let (names, options) = parse_env_config("[env:tbeam]\nboard = ttgo-t-beam\n");
    assert_eq!(names, vec!["tbeam"]);
    assert!(options["tbeam"].is_empty());
}

#[test]
fn parses_env_header_with_trailing_comment_and_whitespace() {
    let content = "[ env : t-deck ] ; trailing comment\nbuild_flags = -DDECK\n";
    let (names, options) = parse_env_config(content);
    assert_eq!(names, vec!["t-deck"]);
    assert_eq!(flags(&options["t-deck"]), vec!["-DDECK"]);
}

#[test]
fn common_env_section_is_prepended_to_each_target() {
    let content = "\
[env]
build_flags = -DCOMMON
lib_deps = shared/lib

[env:one]
build_flags = -DONE

[env:two]
lib_deps = two/lib
";
    let (names, options) = parse_env_config(content);
    assert_eq!(names, vec!["one", "two"]);
    assert_eq!(flags(&options["one"]), vec!["-DCOMMON", "-DONE"]);
    assert_eq!(deps(&options["one"]), vec!["shared/lib"]);
    assert_eq!(flags(&options["two"]), vec!["-DCOMMON"]);
    assert_eq!(deps(&options["two"]), vec!["shared/lib", "two/lib"]);
}

#[test]
fn continuation_lines_append_to_the_open_option() {
    let content = "\
[env:esp]
build_flags =
    -DFIRST
    -DSECOND ; inline comment
lib_deps =
    vendor/json @ ^7
";
    let (_, options) = parse_env_config(content);
    assert_eq!(flags(&options["esp"]), vec!["-DFIRST", "-DSECOND"]);
    assert_eq!(deps(&options["esp"]), vec!["vendor/json @ ^7"]);
}

#[test]
fn blank_line_closes_a_continuation() {
    let content = "\
[env:esp]
build_flags = -DKEPT

    -DORPHANED
";
    let (_, options) = parse_env_config(content);
    // The indented line after a blank is not a continuation.
    assert_eq!(flags(&options["esp"]), vec!["-DKEPT"]);
}

#[test]
fn comment_lines_do_not_close_a_continuation() {
    let content = "\
[env:esp]
build_flags =
    -DFIRST
; a full-line comment
    -DSECOND
";
    let (_, options) = parse_env_config(content);
    assert_eq!(flags(&options["esp"]), vec!["-DFIRST", "-DSECOND"]);
}

#[test]
fn inline_comment_requires_preceding_whitespace() {
    let content = "[env:esp]\nbuild_flags = -DURL=http://x#y -DREAL ; cut\n";
    let (_, options) = parse_env_config(content);
    // '#' glued to the value is data; ' ; ' starts the comment.
    assert_eq!(flags(&options["esp"]), vec!["-DURL=http://x#y -DREAL"]);
}

#[test]
fn multiple_env_sections_listed_in_source_order() {
    let content = "[env:zz]\n[env:aa]\n[env:mm]\n";
    let (names, _) = parse_env_config(content);
    assert_eq!(names, vec!["zz", "aa", "mm"]);
}

#[test]
fn unrelated_sections_and_options_are_ignored() {
    let content = "\
[platformio]
default_envs = tbeam

[env:tbeam]
board = ttgo-t-beam
upload_speed = 921600
build_flags = -DOK
";
    let (names, options) = parse_env_config(content);
    assert_eq!(names, vec!["tbeam"]);
    assert_eq!(flags(&options["tbeam"]), vec!["-DOK"]);
}

#[test]
fn invalid_env_names_are_skipped() {
    let content = "[env:bad name]\nbuild_flags = -DLOST\n[env:good]\n";
    let (names, options) = parse_env_config(content);
    assert_eq!(names, vec!["good"]);
    assert!(!options.contains_key("bad name"));
}

// ---------------------------------------------------------------------------
// Walking and resolution
// ---------------------------------------------------------------------------

fn write_variant(root: &Path, rel: &str, ini: &str) {
    let dir = root.join("variants").join(rel);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("platformio.ini"), ini).unwrap();
}

#[test]
fn list_devices_sorts_and_dedups_across_projects() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "tbeam", "[env:tbeam]\nbuild_flags = -DTBEAM\n");
    write_variant(repo.path(), "heltec", "[env:heltec-v3]\n");

    let devices = list_devices(repo.path()).unwrap();
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["heltec-v3", "tbeam"]);
    assert_eq!(flags(&devices[1].options), vec!["-DTBEAM"]);
}

#[test]
fn walker_does_not_descend_into_variant_projects() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "outer", "[env:outer]\n");
    // Nested project under an existing one must be invisible.
    write_variant(repo.path(), "outer/inner", "[env:inner]\n");

    let devices = list_devices(repo.path()).unwrap();
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["outer"]);
}

#[test]
fn dotted_directories_are_skipped() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), ".hidden", "[env:hidden]\n");
    write_variant(repo.path(), "visible", "[env:visible]\n");

    let devices = list_devices(repo.path()).unwrap();
    let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["visible"]);
}

#[test]
fn resolves_by_relative_path_first() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "esp32/tbeam", "[env:tbeam]\nbuild_flags = -DT\n");

    let resolved = resolve_selection(repo.path(), "esp32/tbeam").unwrap().unwrap();
    assert_eq!(resolved.env_name, "tbeam");
    assert_eq!(resolved.relative_path, "esp32/tbeam");
    assert_eq!(flags(&resolved.options), vec!["-DT"]);
}

#[test]
fn resolves_unique_env_name() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "board-a", "[env:alpha]\n[env:alpha-s3]\n[env:board-a]\n");

    let resolved = resolve_selection(repo.path(), "alpha-s3").unwrap().unwrap();
    assert_eq!(resolved.env_name, "alpha-s3");
    assert_eq!(resolved.relative_path, "board-a");
}

#[test]
fn ambiguous_env_name_is_an_error_listing_candidates() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "a", "[env:shared]\n");
    write_variant(repo.path(), "b", "[env:shared]\n");

    let err = resolve_selection(repo.path(), "shared").unwrap_err();
    match err {
        EngineError::AmbiguousEnv { selection, options } => {
            assert_eq!(selection, "shared");
            assert_eq!(options, "a (shared), b (shared)");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn path_match_with_multiple_envs_prefers_env_named_like_directory() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "family/tbeam", "[env:tbeam-s3]\n[env:tbeam]\n");

    let resolved = resolve_selection(repo.path(), "family/tbeam").unwrap().unwrap();
    assert_eq!(resolved.env_name, "tbeam");
}

#[test]
fn resolves_directory_basename_with_single_env() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "family/rak4631", "[env:rak4631_eth]\n");

    let resolved = resolve_selection(repo.path(), "rak4631").unwrap().unwrap();
    assert_eq!(resolved.env_name, "rak4631_eth");
    assert_eq!(resolved.relative_path, "family/rak4631");
}

#[test]
fn basename_with_multiple_foreign_envs_is_ambiguous() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "combo", "[env:one]\n[env:two]\n");

    let err = resolve_selection(repo.path(), "combo").unwrap_err();
    assert!(matches!(err, EngineError::MultipleEnvTargets { .. }));
}

#[test]
fn unknown_selection_resolves_to_none() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "tbeam", "[env:tbeam]\n");

    assert!(resolve_selection(repo.path(), "rak4631").unwrap().is_none());
}

#[test]
fn invalid_selection_is_a_validation_error() {
    let repo = tempfile::tempdir().unwrap();
    write_variant(repo.path(), "tbeam", "[env:tbeam]\n");

    let err = resolve_selection(repo.path(), "../escape").unwrap_err();
    assert!(matches!(err, EngineError::Validate(_)));
}
