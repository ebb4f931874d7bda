//! Read side: course, lesson and navigation lookups.
//!
//! Lookups are plain functions over any [`DocumentStore`], returning typed
//! documents. Navigation reads the stored `course_outline` rows, so the
//! answer always reflects the last committed load. The `run_*` functions
//! are the CLI printers for `syl courses`, `show`, `lesson`, `version` and
//! `query`.

use anyhow::Result as CliResult;
use serde_json::Value;

use crate::doctypes::{
    fetch, find_all, lesson_key, Course, CourseInstructor, Doctype, Instructor, Lesson, Module,
    OutlineEntry, Typed, Version,
};
use crate::error::Result;
use crate::outline::{Neighbor, Position};
use crate::query::Query;
use crate::store::DocumentStore;

pub async fn list_courses<S: DocumentStore + ?Sized>(store: &S) -> Result<Vec<Typed<Course>>> {
    find_all(store, &Course::query()).await
}

pub async fn get_course<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
) -> Result<Option<Typed<Course>>> {
    fetch(store, course).await
}

pub async fn get_lesson<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
    lesson: &str,
) -> Result<Option<Typed<Lesson>>> {
    fetch(store, &lesson_key(course, module, lesson)).await
}

/// Instructors of a course in display order.
pub async fn get_instructors<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
) -> Result<Vec<Typed<Instructor>>> {
    let mut links: Vec<Typed<CourseInstructor>> =
        find_all(store, &CourseInstructor::query().filter("course", course)?).await?;
    links.sort_by_key(|l| l.position);

    let keys: Vec<&str> = links.iter().map(|l| l.instructor.as_str()).collect();
    store
        .get_many(Instructor::DOCTYPE, &keys)
        .await?
        .into_iter()
        .map(Typed::from_document)
        .collect()
}

/// Modules still in the course outline, by index.
pub async fn get_modules<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
) -> Result<Vec<Typed<Module>>> {
    let mut modules: Vec<Typed<Module>> =
        find_all(store, &Module::query().filter("course", course)?).await?;
    modules.retain(|m| !m.orphan);
    modules.sort_by_key(|m| m.index);
    Ok(modules)
}

/// Lessons of a module still in the course outline, by index.
pub async fn get_module_lessons<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
) -> Result<Vec<Typed<Lesson>>> {
    let query = Lesson::query()
        .filter("course", course)?
        .filter("module", module)?;
    let mut lessons: Vec<Typed<Lesson>> = find_all(store, &query).await?;
    lessons.retain(|l| !l.orphan);
    lessons.sort_by_key(|l| l.index);
    Ok(lessons)
}

/// Outline rows of a course: live rows in outline order, then orphans.
pub async fn get_outline<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
) -> Result<Vec<Typed<OutlineEntry>>> {
    let mut rows: Vec<Typed<OutlineEntry>> =
        find_all(store, &OutlineEntry::query().filter("course", course)?).await?;
    rows.sort_by_key(|r| (r.orphan, r.module_index, r.lesson_index));
    Ok(rows)
}

async fn live_entry<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
    lesson: &str,
) -> Result<Option<Typed<OutlineEntry>>> {
    let entry: Option<Typed<OutlineEntry>> = fetch(store, &lesson_key(course, module, lesson)).await?;
    Ok(entry.filter(|e| !e.orphan))
}

/// 1-based `(module, lesson)` position; `None` for unknown or orphaned
/// lessons.
pub async fn get_lesson_index<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
    lesson: &str,
) -> Result<Option<Position>> {
    Ok(live_entry(store, course, module, lesson)
        .await?
        .map(|e| e.position()))
}

pub async fn get_next_lesson<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
    lesson: &str,
) -> Result<Option<Neighbor>> {
    Ok(live_entry(store, course, module, lesson)
        .await?
        .and_then(|e| e.value.next))
}

pub async fn get_previous_lesson<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
    lesson: &str,
) -> Result<Option<Neighbor>> {
    Ok(live_entry(store, course, module, lesson)
        .await?
        .and_then(|e| e.value.prev))
}

pub async fn get_version<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
) -> Result<Option<Typed<Version>>> {
    fetch(store, course).await
}

// ─── CLI printers ───────────────────────────────────────────────────

pub async fn run_courses<S: DocumentStore + ?Sized>(store: &S) -> CliResult<()> {
    let courses = list_courses(store).await?;
    if courses.is_empty() {
        println!("No courses loaded.");
        return Ok(());
    }
    for course in &courses {
        println!("{}  {}", course.key, course.title);
    }
    Ok(())
}

pub async fn run_show<S: DocumentStore + ?Sized>(store: &S, course_key: &str) -> CliResult<()> {
    let course = match get_course(store, course_key).await? {
        Some(c) => c,
        None => {
            eprintln!("Error: course not found: {}", course_key);
            std::process::exit(1);
        }
    };
    let instructors = get_instructors(store, course_key).await?;
    let modules = get_modules(store, course_key).await?;
    let outline = get_outline(store, course_key).await?;

    println!("--- Course ---");
    println!("key:          {}", course.key);
    println!("id:           {}", course.id);
    println!("title:        {}", course.title);
    if let Some(ref short) = course.short_description {
        println!("summary:      {}", short);
    }
    let names: Vec<&str> = instructors.iter().map(|i| i.name.as_str()).collect();
    println!("instructors:  {}", names.join(", "));
    if let Some(version) = get_version(store, course_key).await? {
        println!("version:      {}", version.token);
        println!("loaded_at:    {}", version.loaded_at);
    }
    println!();

    println!("--- Modules ({}) ---", modules.len());
    for module in &modules {
        println!("{}. {}  {}", module.index, module.name, module.title);
    }
    println!();

    println!("--- Outline ({}) ---", outline.len());
    for entry in &outline {
        let marker = if entry.orphan { "  [orphan]" } else { "" };
        println!(
            "{} {}/{}{}",
            entry.position(),
            entry.module,
            entry.lesson,
            marker
        );
    }
    Ok(())
}

pub async fn run_lesson<S: DocumentStore + ?Sized>(
    store: &S,
    course: &str,
    module: &str,
    lesson: &str,
) -> CliResult<()> {
    let found = match get_lesson(store, course, module, lesson).await? {
        Some(l) => l,
        None => {
            eprintln!("Error: lesson not found: {}", lesson_key(course, module, lesson));
            std::process::exit(1);
        }
    };
    let entry: Option<Typed<OutlineEntry>> =
        fetch(store, &lesson_key(course, module, lesson)).await?;

    println!("--- Lesson ---");
    println!("key:          {}", found.key);
    println!("id:           {}", found.id);
    println!("title:        {}", found.title);
    println!("url:          {}", found.url());
    println!("path:         {}", found.path);
    match &entry {
        Some(e) if e.orphan => println!("position:     {} (orphan)", e.position()),
        Some(e) => println!("position:     {}", e.position()),
        None => println!("position:     (not in outline)"),
    }
    let neighbor = |n: &Option<Neighbor>| match n {
        Some(n) => format!("{}/{} {}", n.module, n.lesson, n.position()),
        None => "(none)".to_string(),
    };
    if let Some(e) = entry.as_ref().filter(|e| !e.orphan) {
        println!("previous:     {}", neighbor(&e.prev));
        println!("next:         {}", neighbor(&e.next));
    }
    println!();

    println!("--- Content ---");
    println!("{}", found.content);
    Ok(())
}

pub async fn run_version<S: DocumentStore + ?Sized>(store: &S, course: &str) -> CliResult<()> {
    match get_version(store, course).await? {
        Some(version) => {
            println!("{}", version.token);
            Ok(())
        }
        None => {
            eprintln!("Error: no version for course: {}", course);
            std::process::exit(1);
        }
    }
}

/// `--where` value: JSON if it parses, else the raw string.
pub fn parse_filter_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Prints matching documents as JSON lines.
pub async fn run_query<S: DocumentStore + ?Sized>(
    store: &S,
    doctype: &str,
    filters: &[(String, String)],
    limit: Option<u64>,
    offset: Option<u64>,
) -> CliResult<()> {
    let mut query = Query::for_doctype(doctype);
    for (name, raw) in filters {
        query = query.filter(name, parse_filter_value(raw))?;
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    if let Some(offset) = offset {
        query = query.offset(offset);
    }

    for doc in store.query(&query).await? {
        println!("{}", serde_json::to_string(&doc)?);
    }
    Ok(())
}
