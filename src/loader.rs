//! Course ingestion pipeline.
//!
//! [`CourseLoader::load`] turns a course directory into store documents:
//!
//! 1. Parse and validate ([`parser::read_course`]). Errors abort before any
//!    write.
//! 2. Stage local author photos into `content.assets_dir`, if configured.
//! 3. Take the per-course lock, so one load per course key is in flight.
//! 4. In a single unit of work: upsert the course, its instructors, the
//!    course ↔ instructor rows (replaced, in author order), modules and
//!    lessons; flag modules and lessons that left the outline as orphans;
//!    re-link the outline and replace the course's outline rows, carrying
//!    rows of removed lessons over as orphans; stamp a new version token.
//! 5. Commit, or roll back on any error so the store is left untouched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;

use crate::config::ContentConfig;
use crate::doctypes::{
    find_all, save_typed, Course, CourseInstructor, Doctype, Instructor, Lesson, LessonStub,
    Module, ModuleStub, OutlineEntry, PhotoRef, Version,
};
use crate::error::Result;
use crate::outline::{carry_orphans, link_outline, OutlineLesson, OutlineModule};
use crate::parser::{self, ParsedCourse, ParsedPhoto};
use crate::progress::{LoadProgressEvent, LoadProgressReporter, LoadStage, NoProgress};
use crate::query::Query;
use crate::store::{DocumentStore, Transactional, UnitOfWork};

/// One async mutex per key, created on first use.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder of `key` remains.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Unheld entries have no other reference.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub course: String,
    pub course_id: String,
    pub instructors: usize,
    pub modules: usize,
    pub lessons: usize,
    pub outline_rows: usize,
    /// `module/lesson` of outline rows kept as orphans.
    pub orphans: Vec<String>,
    /// Keys of module and lesson documents newly flagged as orphans.
    pub retired: Vec<String>,
    pub unlisted: Vec<PathBuf>,
    pub photos_copied: usize,
    pub version: String,
}

pub struct CourseLoader<S> {
    store: Arc<S>,
    content: ContentConfig,
    locks: KeyedLocks,
    progress: Box<dyn LoadProgressReporter>,
}

impl<S: Transactional> CourseLoader<S> {
    pub fn new(store: Arc<S>, content: ContentConfig) -> Self {
        Self {
            store,
            content,
            locks: KeyedLocks::new(),
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn LoadProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Shares a lock table with other loaders over the same store.
    pub fn with_locks(mut self, locks: KeyedLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn load(&self, path: &Path) -> Result<LoadReport> {
        self.progress.report(LoadProgressEvent::Parsing {
            path: path.display().to_string(),
        });
        let parsed = parser::read_course(path, &self.content)?;
        for file in &parsed.unlisted {
            tracing::warn!(
                course = %parsed.name,
                file = %file.display(),
                "markdown file is not part of the outline"
            );
        }

        let (photos, photos_copied) = self.stage_photos(&parsed)?;

        let _guard = self.locks.lock(&parsed.name).await;
        tracing::debug!(course = %parsed.name, "lock acquired");

        let uow = self.store.begin().await?;
        let written = self.write_course(uow.as_ref(), &parsed, &photos).await;
        match written {
            Ok(mut report) => {
                uow.commit().await?;
                report.photos_copied = photos_copied;
                self.progress.report(LoadProgressEvent::Committed {
                    course: report.course.clone(),
                    token: report.version.clone(),
                });
                tracing::info!(
                    course = %report.course,
                    lessons = report.lessons,
                    orphans = report.orphans.len(),
                    "course loaded"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback().await {
                    tracing::warn!(course = %parsed.name, error = %rollback, "rollback failed");
                }
                tracing::warn!(course = %parsed.name, error = %e, "load aborted");
                Err(e)
            }
        }
    }

    /// Resolves the stored photo reference of every author, copying local
    /// files into the assets directory when one is configured.
    fn stage_photos(&self, parsed: &ParsedCourse) -> Result<(HashMap<String, PhotoRef>, usize)> {
        let mut photos = HashMap::new();
        let mut copied = 0;
        for author in &parsed.authors {
            let photo = match &author.photo {
                None => continue,
                Some(ParsedPhoto::Url(url)) => PhotoRef::Url(url.clone()),
                Some(ParsedPhoto::File(source)) => match &self.content.assets_dir {
                    Some(assets) => {
                        let file_name = source
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| author.key.clone());
                        let dir = assets.join(&author.key);
                        std::fs::create_dir_all(&dir)?;
                        let dest = dir.join(&file_name);
                        if !same_contents(source, &dest)? {
                            std::fs::copy(source, &dest)?;
                            copied += 1;
                        }
                        PhotoRef::Path(dest.display().to_string())
                    }
                    None => PhotoRef::Path(source.display().to_string()),
                },
            };
            photos.insert(author.key.clone(), photo);
        }
        Ok((photos, copied))
    }

    async fn write_course(
        &self,
        uow: &dyn UnitOfWork,
        parsed: &ParsedCourse,
        photos: &HashMap<String, PhotoRef>,
    ) -> Result<LoadReport> {
        let course_key = parsed.name.as_str();

        let course = save_typed(uow, &course_record(parsed)).await?;

        let total = parsed.authors.len() as u64;
        for (i, author) in parsed.authors.iter().enumerate() {
            let instructor = Instructor {
                key: author.key.clone(),
                name: author.name.clone(),
                bio: author.bio.clone(),
                photo: photos.get(&author.key).cloned(),
            };
            save_typed(uow, &instructor).await?;
            self.progress.report(LoadProgressEvent::Writing {
                course: course_key.to_string(),
                stage: LoadStage::Instructors,
                n: i as u64 + 1,
                total,
            });
        }

        uow.delete(&CourseInstructor::query().filter("course", course_key)?)
            .await?;
        for (i, author) in parsed.authors.iter().enumerate() {
            let link = CourseInstructor {
                course: course_key.to_string(),
                instructor: author.key.clone(),
                position: i as u32 + 1,
            };
            save_typed(uow, &link).await?;
        }

        let mut outline_modules = Vec::with_capacity(parsed.modules.len());
        let module_total = parsed.modules.len() as u64;
        let lesson_total = parsed.lesson_count() as u64;
        let mut lessons_written = 0u64;
        let mut live_modules = HashSet::new();
        let mut live_lessons = HashSet::new();
        for (mi, parsed_module) in parsed.modules.iter().enumerate() {
            let module = save_typed(
                uow,
                &Module {
                    course: course_key.to_string(),
                    name: parsed_module.name.clone(),
                    title: parsed_module.title.clone(),
                    index: mi as u32 + 1,
                    orphan: false,
                },
            )
            .await?;
            live_modules.insert(module.key.clone());
            self.progress.report(LoadProgressEvent::Writing {
                course: course_key.to_string(),
                stage: LoadStage::Modules,
                n: mi as u64 + 1,
                total: module_total,
            });

            let mut outline_lessons = Vec::with_capacity(parsed_module.lessons.len());
            for (li, parsed_lesson) in parsed_module.lessons.iter().enumerate() {
                let lesson = save_typed(
                    uow,
                    &Lesson {
                        course: course_key.to_string(),
                        module: parsed_module.name.clone(),
                        name: parsed_lesson.name.clone(),
                        title: parsed_lesson.title.clone(),
                        content: parsed_lesson.content.clone(),
                        path: parsed_lesson.path.clone(),
                        index: li as u32 + 1,
                        orphan: false,
                    },
                )
                .await?;
                live_lessons.insert(lesson.key.clone());
                lessons_written += 1;
                self.progress.report(LoadProgressEvent::Writing {
                    course: course_key.to_string(),
                    stage: LoadStage::Lessons,
                    n: lessons_written,
                    total: lesson_total,
                });
                outline_lessons.push(OutlineLesson {
                    id: lesson.id,
                    name: lesson.value.name,
                });
            }

            outline_modules.push(OutlineModule {
                id: module.id,
                name: module.value.name,
                lessons: outline_lessons,
            });
        }

        let mut retired = retire_missing(uow, Module::DOCTYPE, course_key, &live_modules).await?;
        retired.extend(retire_missing(uow, Lesson::DOCTYPE, course_key, &live_lessons).await?);

        let outline_query = OutlineEntry::query().filter("course", course_key)?;
        let previous: Vec<OutlineEntry> = find_all::<OutlineEntry, _>(uow, &outline_query)
            .await?
            .into_iter()
            .map(|t| t.value)
            .collect();

        let links = link_outline(&outline_modules);
        let orphans = carry_orphans(&previous, &links);

        uow.delete(&outline_query).await?;
        let outline_rows = links.len() + orphans.len();
        let mut written = 0u64;
        for link in links {
            save_typed(uow, &link.into_entry(course_key)).await?;
            written += 1;
            self.progress.report(LoadProgressEvent::Writing {
                course: course_key.to_string(),
                stage: LoadStage::Outline,
                n: written,
                total: outline_rows as u64,
            });
        }
        for orphan in &orphans {
            save_typed(uow, orphan).await?;
            written += 1;
            self.progress.report(LoadProgressEvent::Writing {
                course: course_key.to_string(),
                stage: LoadStage::Outline,
                n: written,
                total: outline_rows as u64,
            });
        }

        let version = stamp_version(uow, course_key).await?;

        Ok(LoadReport {
            course: course_key.to_string(),
            course_id: course.id,
            instructors: parsed.authors.len(),
            modules: parsed.modules.len(),
            lessons: parsed.lesson_count(),
            outline_rows,
            orphans: orphans
                .iter()
                .map(|o| format!("{}/{}", o.module, o.lesson))
                .collect(),
            retired,
            unlisted: parsed.unlisted.clone(),
            photos_copied: 0,
            version: version.token,
        })
    }
}

/// Flags every `doctype` document of `course` whose key was not written by
/// this load. Returns the keys flagged now; earlier orphans are left alone.
async fn retire_missing(
    uow: &dyn UnitOfWork,
    doctype: &str,
    course: &str,
    live: &HashSet<String>,
) -> Result<Vec<String>> {
    let query = Query::for_doctype(doctype).filter("course", course)?;
    let mut retired = Vec::new();
    for mut doc in uow.query(&query).await? {
        if live.contains(&doc.key) || doc.bool_field("orphan") == Some(true) {
            continue;
        }
        doc.set_field("orphan", true);
        tracing::debug!(doctype, key = %doc.key, "flagged as orphan");
        uow.save(doctype, &doc.key, doc.data).await?;
        retired.push(doc.key);
    }
    Ok(retired)
}

fn same_contents(source: &Path, dest: &Path) -> Result<bool> {
    if !dest.exists() {
        return Ok(false);
    }
    Ok(std::fs::read(source)? == std::fs::read(dest)?)
}

/// CLI summary of a load, ending with `ok`.
pub fn print_report(report: &LoadReport) {
    println!("load {}", report.course);
    println!("  instructors: {}", report.instructors);
    println!("  modules: {}", report.modules);
    println!("  lessons: {}", report.lessons);
    println!("  outline rows: {}", report.outline_rows);
    if !report.orphans.is_empty() {
        println!("  orphans: {}", report.orphans.join(", "));
    }
    if !report.retired.is_empty() {
        println!("  retired: {}", report.retired.join(", "));
    }
    if !report.unlisted.is_empty() {
        let files: Vec<String> = report
            .unlisted
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        println!("  unlisted: {}", files.join(", "));
    }
    if report.photos_copied > 0 {
        println!("  photos copied: {}", report.photos_copied);
    }
    println!("  version: {}", report.version);
    println!("ok");
}

fn course_record(parsed: &ParsedCourse) -> Course {
    Course {
        name: parsed.name.clone(),
        title: parsed.title.clone(),
        short_description: parsed.short_description.clone(),
        description: parsed.description.clone(),
        authors: parsed.authors.iter().map(|a| a.key.clone()).collect(),
        outline: parsed
            .modules
            .iter()
            .map(|m| ModuleStub {
                name: m.name.clone(),
                title: m.title.clone(),
                lessons: m
                    .lessons
                    .iter()
                    .map(|l| LessonStub {
                        name: l.name.clone(),
                        title: l.title.clone(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// SHA-256 over the course key, a fresh nonce and the load time.
pub fn new_version_token(course: &str, loaded_at: &str) -> String {
    let nonce = uuid::Uuid::new_v4();
    let mut hasher = Sha256::new();
    hasher.update(course.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(loaded_at.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn stamp_version<S: DocumentStore + ?Sized>(store: &S, course: &str) -> Result<Version> {
    let loaded_at = chrono::Utc::now().to_rfc3339();
    let version = Version {
        course: course.to_string(),
        token: new_version_token(course, &loaded_at),
        loaded_at,
    };
    Ok(save_typed(store, &version).await?.value)
}
