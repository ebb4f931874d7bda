mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn syl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("syl");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    common::write_alpha(&root.join("courses/alpha"));

    let config_content = format!(
        r#"[db]
path = "{}/data/syllabus.sqlite"

[watch]
quiet_period_ms = 200
"#,
        root.display()
    );
    let config_path = root.join("syllabus.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_syl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = syl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run syl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn course_path(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .join("courses/alpha")
        .display()
        .to_string()
}

fn load(config_path: &Path) -> String {
    let course = course_path(config_path);
    let (stdout, stderr, success) = run_syl(config_path, &["load", &course, "--progress", "off"]);
    assert!(success, "load failed: {}", stderr);
    stdout
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_syl(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/syllabus.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, s1) = run_syl(&config_path, &["init"]);
    let (_, _, s2) = run_syl(&config_path, &["init"]);
    assert!(s1);
    assert!(s2);
}

#[test]
fn test_load_prints_report() {
    let (_tmp, config_path) = setup_test_env();
    let stdout = load(&config_path);
    assert!(stdout.contains("load alpha"));
    assert!(stdout.contains("instructors: 2"));
    assert!(stdout.contains("lessons: 5"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_load_invalid_course_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("courses/alpha/lessons/moonu.md")).unwrap();
    let course = course_path(&config_path);
    let (_, stderr, success) = run_syl(&config_path, &["load", &course, "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("lessons/moonu.md"), "stderr: {}", stderr);
}

#[test]
fn test_courses_lists_loaded() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_syl(&config_path, &["courses"]);
    assert!(success);
    assert!(stdout.contains("No courses loaded."));

    load(&config_path);
    let (stdout, _, success) = run_syl(&config_path, &["courses"]);
    assert!(success);
    assert!(stdout.contains("alpha"));
    assert!(stdout.contains("Alpha Course"));
}

#[test]
fn test_show_outline() {
    let (_tmp, config_path) = setup_test_env();
    load(&config_path);
    let (stdout, _, success) = run_syl(&config_path, &["show", "alpha"]);
    assert!(success);
    assert!(stdout.contains("Alfa Alice, Bravo Bob"));
    assert!(stdout.contains("--- Outline (5) ---"));
    assert!(stdout.contains("(1, 3) uno-module/moonu"));
    assert!(stdout.contains("(2, 2) dos-module/anju"));

    let (_, stderr, success) = run_syl(&config_path, &["show", "nope"]);
    assert!(!success);
    assert!(stderr.contains("course not found"));
}

#[test]
fn test_lesson_neighbors() {
    let (_tmp, config_path) = setup_test_env();
    load(&config_path);
    let (stdout, _, success) = run_syl(&config_path, &["lesson", "alpha", "uno-module", "moonu"]);
    assert!(success);
    assert!(stdout.contains("title:        Three"));
    assert!(stdout.contains("position:     (1, 3)"));
    assert!(stdout.contains("previous:     uno-module/rendu (1, 2)"));
    assert!(stdout.contains("next:         dos-module/naalu (2, 1)"));
    assert!(stdout.contains("The number moonu."));
}

#[test]
fn test_version_changes_on_reload() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_syl(&config_path, &["version", "alpha"]);
    assert!(!success);

    load(&config_path);
    let (first, _, success) = run_syl(&config_path, &["version", "alpha"]);
    assert!(success);
    assert_eq!(first.trim().len(), 64);

    load(&config_path);
    let (second, _, _) = run_syl(&config_path, &["version", "alpha"]);
    assert_ne!(first.trim(), second.trim());
}

#[test]
fn test_query_with_filters() {
    let (_tmp, config_path) = setup_test_env();
    load(&config_path);
    let (stdout, _, success) = run_syl(
        &config_path,
        &["query", "lesson", "--where", "module=uno-module", "--where", "index=2"],
    );
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("alpha/uno-module/rendu"));

    let (stdout, _, success) = run_syl(&config_path, &["query", "lesson", "--limit", "2"]);
    assert!(success);
    assert_eq!(stdout.lines().count(), 2);

    let (_, _, success) = run_syl(&config_path, &["query", "lesson", "--where", "bad-name=1"]);
    assert!(!success);
}

#[test]
fn test_new_site_then_load_into_it() {
    let tmp = TempDir::new().unwrap();
    let site = tmp.path().join("site");
    let unused = tmp.path().join("absent.toml");

    let (stdout, stderr, success) = run_syl(&unused, &["new-site", site.to_str().unwrap()]);
    assert!(success, "new-site failed: {}", stderr);
    assert!(stdout.contains("New site created at"));
    assert!(site.join("syllabus.sqlite").is_file());
    assert!(site.join("assets").is_dir());
    let config = fs::read_to_string(site.join("syllabus.toml")).unwrap();
    assert!(config.contains("assets_dir = \"assets\""));

    let (_, stderr, success) = run_syl(&unused, &["new-site", site.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("already exists"), "stderr: {}", stderr);

    let course = tmp.path().join("alpha");
    common::write_alpha(&course);
    let site_config = site.join("syllabus.toml");
    let (_, stderr, success) = run_syl(
        &site_config,
        &["load", course.to_str().unwrap(), "--progress", "off"],
    );
    assert!(success, "load failed: {}", stderr);
    let (stdout, _, _) = run_syl(&site_config, &["courses"]);
    assert!(stdout.contains("Alpha Course"));
}

#[test]
fn test_load_directory_of_courses() {
    let (tmp, config_path) = setup_test_env();
    let beta = tmp.path().join("courses/beta");
    common::write_alpha(&beta);
    common::write(
        &beta,
        "course.yml",
        &common::alpha_definition(&["onnu"], &["alfa"]).replacen("name: alpha", "name: beta", 1),
    );

    let courses_dir = tmp.path().join("courses");
    let (stdout, stderr, success) = run_syl(
        &config_path,
        &["load", courses_dir.to_str().unwrap(), "--progress", "off"],
    );
    assert!(success, "load failed: {}", stderr);
    let alpha_at = stdout.find("load alpha").unwrap();
    let beta_at = stdout.find("load beta").unwrap();
    assert!(alpha_at < beta_at);

    let (stdout, _, _) = run_syl(&config_path, &["courses"]);
    assert!(stdout.contains("alpha"));
    assert!(stdout.contains("beta"));

    // one broken course fails the run but the others still load
    fs::remove_file(beta.join("lessons/onnu.md")).unwrap();
    let (stdout, stderr, success) = run_syl(
        &config_path,
        &["load", courses_dir.to_str().unwrap(), "--progress", "off"],
    );
    assert!(!success);
    assert!(stdout.contains("load alpha"));
    assert!(stderr.contains("lessons/onnu.md"), "stderr: {}", stderr);

    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    let (_, stderr, success) = run_syl(&config_path, &["load", empty.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("course.yml"), "stderr: {}", stderr);
}

#[test]
fn test_show_lists_live_modules() {
    let (tmp, config_path) = setup_test_env();
    load(&config_path);
    let (stdout, _, _) = run_syl(&config_path, &["show", "alpha"]);
    assert!(stdout.contains("--- Modules (2) ---"));
    assert!(stdout.contains("1. uno-module  Uno"));

    common::write(
        &tmp.path().join("courses/alpha"),
        "course.yml",
        "name: alpha\ntitle: Alpha Course\ndescription: Counting.\nauthors:\n  - alfa\noutline:\n  - name: dos-module\n    title: Dos\n    lessons:\n      - lessons/naalu.md\n      - lessons/anju.md\n",
    );
    let stdout = load(&config_path);
    assert!(stdout.contains("retired: "));
    let (stdout, _, _) = run_syl(&config_path, &["show", "alpha"]);
    assert!(stdout.contains("--- Modules (1) ---"));
    assert!(stdout.contains("1. dos-module  Dos"));
    assert!(!stdout.contains("uno-module  Uno"));
}
