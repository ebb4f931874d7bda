#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use syllabus::config::Config;
use syllabus::doctypes::DoctypeRegistry;
use syllabus::migrate;
use syllabus::store::{MemoryStore, SqliteStore};
use tempfile::TempDir;

pub fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

pub fn alpha_definition(uno_lessons: &[&str], authors: &[&str]) -> String {
    let lessons: String = uno_lessons
        .iter()
        .map(|l| format!("      - lessons/{}.md\n", l))
        .collect();
    let authors: String = authors.iter().map(|a| format!("  - {}\n", a)).collect();
    format!(
        r#"name: alpha
title: Alpha Course
short_description: Numbers in Tamil
description: |
  Counting from one to five.
authors:
{}outline:
  - name: uno-module
    title: Uno
    lessons:
{}  - name: dos-module
    title: Dos
    lessons:
      - lessons/naalu.md
      - lessons/anju.md
"#,
        authors, lessons
    )
}

/// Course "alpha": uno-module [onnu, rendu, moonu], dos-module [naalu, anju],
/// authored by alfa and bravo.
pub fn write_alpha(root: &Path) {
    write(
        root,
        "course.yml",
        &alpha_definition(&["onnu", "rendu", "moonu"], &["alfa", "bravo"]),
    );
    write(
        root,
        "authors/alfa.md",
        "---\nname: Alfa Alice\nphoto: https://example.com/alfa.png\n---\nAlfa writes courses.\n",
    );
    write(
        root,
        "authors/bravo.md",
        "---\nname: Bravo Bob\n---\nBravo teaches.\n",
    );
    for (name, title) in [
        ("onnu", "One"),
        ("rendu", "Two"),
        ("moonu", "Three"),
        ("naalu", "Four"),
        ("anju", "Five"),
    ] {
        write(
            root,
            &format!("lessons/{}.md", name),
            &format!("# {}\n\nThe number {}.\n", title, name),
        );
    }
}

pub fn registry() -> Arc<DoctypeRegistry> {
    Arc::new(DoctypeRegistry::course_doctypes())
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(registry()))
}

pub async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteStore> {
    sqlite_store_with(Config::with_db_path(tmp.path().join("data/syllabus.sqlite"))).await
}

pub async fn sqlite_store_with(config: Config) -> Arc<SqliteStore> {
    let store = SqliteStore::open(&config, registry()).await.unwrap();
    migrate::migrate_pool(store.pool()).await.unwrap();
    Arc::new(store)
}
