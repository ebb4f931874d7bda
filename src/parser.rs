//! Course directory parser.
//!
//! Reads a course definition (YAML) plus the author and lesson files it
//! references into a validated [`ParsedCourse`]. Nothing here touches the
//! store; any problem is reported as [`Error::Validation`] naming the
//! offending field, author key or lesson path.
//!
//! # Layout
//!
//! ```text
//! alpha/
//! ├── course.yml          # name, title, description, authors, outline
//! ├── authors/
//! │   ├── alfa.md         # --- name / photo --- then the bio
//! │   └── bravo.md
//! └── lessons/
//!     ├── onnu.md
//!     └── ...
//! ```
//!
//! Relative paths resolve against the directory holding the definition
//! file, never against the process working directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::config::ContentConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCourse {
    /// Directory holding the definition file.
    pub root: PathBuf,
    pub definition: PathBuf,
    pub name: String,
    pub title: String,
    pub short_description: Option<String>,
    pub description: String,
    /// In definition order, which is the display order.
    pub authors: Vec<ParsedAuthor>,
    pub modules: Vec<ParsedModule>,
    /// Markdown files under `root` that are neither lessons nor author
    /// files, relative to `root`.
    pub unlisted: Vec<PathBuf>,
}

impl ParsedCourse {
    pub fn lesson_count(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAuthor {
    pub key: String,
    pub name: String,
    pub bio: String,
    pub photo: Option<ParsedPhoto>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPhoto {
    Url(String),
    /// Resolved, existing local file.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedModule {
    pub name: String,
    pub title: String,
    pub lessons: Vec<ParsedLesson>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLesson {
    pub name: String,
    pub title: String,
    pub content: String,
    /// As written in the definition.
    pub path: String,
    pub source: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CourseFile {
    name: String,
    title: String,
    #[serde(default)]
    short_description: Option<String>,
    description: String,
    authors: Vec<String>,
    outline: Vec<ChapterFile>,
}

#[derive(Debug, Deserialize)]
struct ChapterFile {
    name: String,
    title: String,
    lessons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorHeader {
    name: String,
    #[serde(default)]
    photo: Option<String>,
}

/// Course directories under `path`.
///
/// A course directory or definition file is returned as is. Otherwise every
/// immediate subdirectory holding a definition file is a course, in name
/// order.
pub fn course_dirs(path: &Path, content: &ContentConfig) -> Result<Vec<PathBuf>> {
    if !path.is_dir() || path.join(&content.course_file).is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut dirs = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if entry.file_type().is_dir() && entry.path().join(&content.course_file).is_file() {
            dirs.push(entry.into_path());
        }
    }
    if dirs.is_empty() {
        return Err(Error::validation(
            path,
            format!("no {} here or in any subdirectory", content.course_file),
        ));
    }
    Ok(dirs)
}

/// Parses the course at `path`: a course directory, or the definition file
/// itself.
pub fn read_course(path: &Path, content: &ContentConfig) -> Result<ParsedCourse> {
    let definition = if path.is_dir() {
        path.join(&content.course_file)
    } else {
        path.to_path_buf()
    };
    if !definition.is_file() {
        return Err(Error::validation(
            &definition,
            "course definition file does not exist",
        ));
    }
    let root = definition
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let raw = std::fs::read_to_string(&definition)?;
    let file: CourseFile = serde_yaml::from_str(&raw)
        .map_err(|e| Error::validation(&definition, e.to_string()))?;

    let invalid = |message: String| Error::validation(&definition, message);

    if file.name.trim().is_empty() {
        return Err(invalid("name must not be blank".to_string()));
    }
    check_name(&file.name).map_err(|m| invalid(format!("name: {}", m)))?;
    if file.title.trim().is_empty() {
        return Err(invalid("title must not be blank".to_string()));
    }
    if file.authors.is_empty() {
        return Err(invalid("authors must list at least one author".to_string()));
    }

    let authors_dir = root.join(&content.authors_dir);
    let mut authors = Vec::with_capacity(file.authors.len());
    for key in &file.authors {
        check_name(key).map_err(|m| invalid(format!("author {:?}: {}", key, m)))?;
        let author_file = authors_dir.join(format!("{}.md", key));
        if !author_file.is_file() {
            return Err(invalid(format!(
                "author file {} for author {:?} does not exist",
                display_relative(&author_file, &root),
                key
            )));
        }
        authors.push(read_author(key, &author_file, &root)?);
    }

    let mut modules = Vec::with_capacity(file.outline.len());
    let mut seen_modules = HashSet::new();
    let mut lesson_files = HashSet::new();
    for (i, chapter) in file.outline.iter().enumerate() {
        check_name(&chapter.name)
            .map_err(|m| invalid(format!("outline[{}].name: {}", i, m)))?;
        if chapter.title.trim().is_empty() {
            return Err(invalid(format!(
                "outline[{}] ({}) title must not be blank",
                i, chapter.name
            )));
        }
        if !seen_modules.insert(chapter.name.as_str()) {
            return Err(invalid(format!("duplicate chapter name {:?}", chapter.name)));
        }

        let mut lessons = Vec::with_capacity(chapter.lessons.len());
        let mut seen_lessons = HashSet::new();
        for lesson_path in &chapter.lessons {
            if lesson_path.trim().is_empty() {
                return Err(invalid(format!(
                    "chapter {:?} has a blank lesson path",
                    chapter.name
                )));
            }
            let source = root.join(lesson_path);
            if !source.is_file() {
                return Err(invalid(format!(
                    "lesson file {} in chapter {:?} does not exist",
                    lesson_path, chapter.name
                )));
            }
            let name = source
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            check_name(&name).map_err(|m| invalid(format!("lesson {}: {}", lesson_path, m)))?;
            if !seen_lessons.insert(name.clone()) {
                return Err(invalid(format!(
                    "duplicate lesson name {:?} in chapter {:?}",
                    name, chapter.name
                )));
            }

            let text = std::fs::read_to_string(&source)?;
            let title = lesson_title(&text).unwrap_or_else(|| title_from_name(&name));
            lesson_files.insert(canonical(&source));
            lessons.push(ParsedLesson {
                name,
                title,
                content: text,
                path: lesson_path.clone(),
                source,
            });
        }

        modules.push(ParsedModule {
            name: chapter.name.clone(),
            title: chapter.title.clone(),
            lessons,
        });
    }

    let unlisted = find_unlisted(&root, &content.authors_dir, &lesson_files)?;

    Ok(ParsedCourse {
        root,
        definition,
        name: file.name,
        title: file.title,
        short_description: file.short_description,
        description: file.description,
        authors,
        modules,
        unlisted,
    })
}

fn check_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.trim().is_empty() {
        Err("must not be empty")
    } else if name.contains('/') {
        Err("must not contain '/'")
    } else {
        Ok(())
    }
}

fn read_author(key: &str, path: &Path, root: &Path) -> Result<ParsedAuthor> {
    let raw = std::fs::read_to_string(path)?;
    let (header, body) = split_front_matter(&raw).ok_or_else(|| {
        Error::validation(path, format!("author {:?} must start with a '---' header", key))
    })?;
    let header: AuthorHeader = serde_yaml::from_str(&header)
        .map_err(|e| Error::validation(path, format!("author {:?}: {}", key, e)))?;
    if header.name.trim().is_empty() {
        return Err(Error::validation(
            path,
            format!("author {:?}: name must not be blank", key),
        ));
    }

    let photo = match header.photo {
        Some(photo) if photo.starts_with("http://") || photo.starts_with("https://") => {
            Some(ParsedPhoto::Url(photo))
        }
        Some(photo) => {
            let file = root.join(&photo);
            if !file.is_file() {
                return Err(Error::validation(
                    path,
                    format!("photo {} for author {:?} does not exist", photo, key),
                ));
            }
            Some(ParsedPhoto::File(file))
        }
        None => None,
    };

    Ok(ParsedAuthor {
        key: key.to_string(),
        name: header.name,
        bio: body.trim().to_string(),
        photo,
    })
}

/// Splits `---` delimited YAML front matter from the body that follows.
fn split_front_matter(content: &str) -> Option<(String, String)> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.first().map(|l| l.trim_end()) != Some("---") {
        return None;
    }
    let end_idx = lines
        .iter()
        .skip(1)
        .position(|line| line.trim_end() == "---")?;

    let header = lines.get(1..=end_idx).unwrap_or(&[]).join("\n");
    let body = lines
        .get(end_idx.saturating_add(2)..)
        .unwrap_or(&[])
        .join("\n");
    Some((header, body))
}

fn heading_pattern() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.*\S)").expect("heading pattern is valid"))
}

fn separator_pattern() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"[-_\s]+").expect("separator pattern is valid"))
}

/// Text of the first Markdown heading, scanning top-down.
pub fn lesson_title(text: &str) -> Option<String> {
    heading_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// `getting-started` → `Getting Started`.
pub fn title_from_name(name: &str) -> String {
    separator_pattern()
        .replace_all(name, " ")
        .trim()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::validation(pattern, format!("invalid glob: {}", e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::validation(".", format!("invalid glob set: {}", e)))
}

fn find_unlisted(
    root: &Path,
    authors_dir: &str,
    lessons: &HashSet<PathBuf>,
) -> Result<Vec<PathBuf>> {
    let include = build_globset(&["**/*.md".to_string()])?;
    let exclude = build_globset(&[
        format!("{}/**", authors_dir.trim_end_matches('/')),
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut unlisted = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude.is_match(relative) || !include.is_match(relative) {
            continue;
        }
        if lessons.contains(&canonical(path)) {
            continue;
        }
        unlisted.push(relative.to_path_buf());
    }
    unlisted.sort();
    Ok(unlisted)
}
