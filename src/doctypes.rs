//! Typed documents and the doctype registry.
//!
//! Each known doctype is a plain serde struct implementing [`Doctype`].
//! Persisted instances are wrapped in [`Typed<T>`], which carries the store
//! id and key and derefs to the struct, so fields read like attributes:
//!
//! ```rust,ignore
//! let lesson: Typed<Lesson> = fetch(&store, "alpha/uno-module/onnu").await?.unwrap();
//! println!("{} ({})", lesson.title, lesson.id);
//! ```
//!
//! Generic load paths decode through a [`DoctypeRegistry`], built once at
//! startup and shared with the store. Doctypes that are not registered come
//! back as [`Record::Generic`].
//!
//! | Doctype | Struct | Key |
//! |---------|--------|-----|
//! | `course` | [`Course`] | `<course>` |
//! | `instructor` | [`Instructor`] | `<author>` |
//! | `course_instructor` | [`CourseInstructor`] | `<course>/<author>` |
//! | `module` | [`Module`] | `<course>/<module>` |
//! | `lesson` | [`Lesson`] | `<course>/<module>/<lesson>` |
//! | `course_outline` | [`OutlineEntry`] | `<course>/<module>/<lesson>` |
//! | `version` | [`Version`] | `<course>` |

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::Document;
use crate::outline::{Neighbor, Position};
use crate::query::Query;
use crate::store::DocumentStore;

/// A struct stored under a fixed doctype.
pub trait Doctype: Serialize + DeserializeOwned + Send + Sync {
    const DOCTYPE: &'static str;

    /// The unique key of this value within its doctype.
    fn key(&self) -> String;

    /// A query pinned to this doctype.
    fn query() -> Query
    where
        Self: Sized,
    {
        Query::for_doctype(Self::DOCTYPE)
    }
}

/// A persisted value of a known doctype.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Typed<T> {
    pub id: String,
    pub key: String,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Deref for Typed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Doctype> Typed<T> {
    pub fn from_document(doc: Document) -> Result<Self> {
        if doc.doctype != T::DOCTYPE {
            return Err(Error::Decode {
                source: serde_json::Error::custom(format!("expected doctype {}", T::DOCTYPE)),
                doctype: doc.doctype,
                key: doc.key,
            });
        }
        let id = doc.id.ok_or_else(|| Error::StoreInvariant {
            doctype: doc.doctype.clone(),
            key: doc.key.clone(),
        })?;
        let value = serde_json::from_value(Value::Object(doc.data)).map_err(|source| {
            Error::Decode {
                doctype: doc.doctype.clone(),
                key: doc.key.clone(),
                source,
            }
        })?;
        Ok(Self {
            id,
            key: doc.key,
            value,
        })
    }
}

/// Serializes a typed value into document fields.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Json(serde_json::Error::custom(format!(
            "expected an object, got {}",
            other
        )))),
    }
}

pub async fn fetch<T, S>(store: &S, key: &str) -> Result<Option<Typed<T>>>
where
    T: Doctype,
    S: DocumentStore + ?Sized,
{
    store
        .get(T::DOCTYPE, key)
        .await?
        .map(Typed::from_document)
        .transpose()
}

pub async fn find_one<T, S>(store: &S, query: &Query) -> Result<Option<Typed<T>>>
where
    T: Doctype,
    S: DocumentStore + ?Sized,
{
    store.find(query).await?.map(Typed::from_document).transpose()
}

pub async fn find_all<T, S>(store: &S, query: &Query) -> Result<Vec<Typed<T>>>
where
    T: Doctype,
    S: DocumentStore + ?Sized,
{
    store
        .query(query)
        .await?
        .into_iter()
        .map(Typed::from_document)
        .collect()
}

/// Upserts `value` under its own key and returns the persisted copy.
pub async fn save_typed<T, S>(store: &S, value: &T) -> Result<Typed<T>>
where
    T: Doctype,
    S: DocumentStore + ?Sized,
{
    let doc = store.save(T::DOCTYPE, &value.key(), to_fields(value)?).await?;
    Typed::from_document(doc)
}

// ─── Doctypes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonStub {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStub {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<LessonStub>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub short_description: Option<String>,
    pub description: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Module/lesson names and titles only; lesson bodies live on [`Lesson`].
    #[serde(default)]
    pub outline: Vec<ModuleStub>,
}

impl Doctype for Course {
    const DOCTYPE: &'static str = "course";

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// Where an instructor photo comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoRef {
    Url(String),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructor {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub photo: Option<PhotoRef>,
}

impl Doctype for Instructor {
    const DOCTYPE: &'static str = "instructor";

    fn key(&self) -> String {
        self.key.clone()
    }
}

/// Course ↔ instructor association; `position` is the display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInstructor {
    pub course: String,
    pub instructor: String,
    pub position: u32,
}

impl Doctype for CourseInstructor {
    const DOCTYPE: &'static str = "course_instructor";

    fn key(&self) -> String {
        format!("{}/{}", self.course, self.instructor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub course: String,
    pub name: String,
    pub title: String,
    pub index: u32,
    /// Dropped from the course outline by a later load.
    #[serde(default)]
    pub orphan: bool,
}

impl Doctype for Module {
    const DOCTYPE: &'static str = "module";

    fn key(&self) -> String {
        format!("{}/{}", self.course, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub course: String,
    pub module: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Source file, relative to the course directory.
    #[serde(default)]
    pub path: String,
    pub index: u32,
    #[serde(default)]
    pub orphan: bool,
}

impl Doctype for Lesson {
    const DOCTYPE: &'static str = "lesson";

    fn key(&self) -> String {
        lesson_key(&self.course, &self.module, &self.name)
    }
}

impl Lesson {
    pub fn url(&self) -> String {
        format!("/courses/{}/{}/{}", self.course, self.module, self.name)
    }
}

pub fn lesson_key(course: &str, module: &str, lesson: &str) -> String {
    format!("{}/{}/{}", course, module, lesson)
}

/// Durable form of one linked outline position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub course: String,
    pub module: String,
    pub lesson: String,
    pub module_id: String,
    pub lesson_id: String,
    pub module_index: u32,
    pub lesson_index: u32,
    #[serde(default)]
    pub prev: Option<Neighbor>,
    #[serde(default)]
    pub next: Option<Neighbor>,
    #[serde(default)]
    pub orphan: bool,
}

impl Doctype for OutlineEntry {
    const DOCTYPE: &'static str = "course_outline";

    fn key(&self) -> String {
        lesson_key(&self.course, &self.module, &self.lesson)
    }
}

impl OutlineEntry {
    pub fn position(&self) -> Position {
        Position {
            module_index: self.module_index,
            lesson_index: self.lesson_index,
        }
    }
}

/// Content version of a course, bumped by every successful load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub course: String,
    pub token: String,
    pub loaded_at: String,
}

impl Doctype for Version {
    const DOCTYPE: &'static str = "version";

    fn key(&self) -> String {
        self.course.clone()
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// A document decoded to its registered representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Course(Typed<Course>),
    Instructor(Typed<Instructor>),
    CourseInstructor(Typed<CourseInstructor>),
    Module(Typed<Module>),
    Lesson(Typed<Lesson>),
    Outline(Typed<OutlineEntry>),
    Version(Typed<Version>),
    Generic(Document),
}

impl Record {
    pub fn key(&self) -> &str {
        match self {
            Record::Course(t) => &t.key,
            Record::Instructor(t) => &t.key,
            Record::CourseInstructor(t) => &t.key,
            Record::Module(t) => &t.key,
            Record::Lesson(t) => &t.key,
            Record::Outline(t) => &t.key,
            Record::Version(t) => &t.key,
            Record::Generic(d) => &d.key,
        }
    }
}

type Decoder = Box<dyn Fn(Document) -> Result<Record> + Send + Sync>;

/// Maps doctype names to decoders.
#[derive(Default)]
pub struct DoctypeRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl fmt::Debug for DoctypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("DoctypeRegistry")
            .field("doctypes", &names)
            .finish()
    }
}

impl DoctypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every doctype written by the course loader.
    pub fn course_doctypes() -> Self {
        let mut registry = Self::new();
        registry.register::<Course>(Record::Course);
        registry.register::<Instructor>(Record::Instructor);
        registry.register::<CourseInstructor>(Record::CourseInstructor);
        registry.register::<Module>(Record::Module);
        registry.register::<Lesson>(Record::Lesson);
        registry.register::<OutlineEntry>(Record::Outline);
        registry.register::<Version>(Record::Version);
        registry
    }

    pub fn register<T: Doctype + 'static>(&mut self, wrap: fn(Typed<T>) -> Record) {
        self.decoders.insert(
            T::DOCTYPE,
            Box::new(move |doc| Typed::<T>::from_document(doc).map(wrap)),
        );
    }

    pub fn is_registered(&self, doctype: &str) -> bool {
        self.decoders.contains_key(doctype)
    }

    pub fn decode(&self, doc: Document) -> Result<Record> {
        match self.decoders.get(doc.doctype.as_str()) {
            Some(decoder) => decoder(doc),
            None => Ok(Record::Generic(doc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn course() -> Course {
        Course {
            name: "alpha".to_string(),
            title: "Alpha".to_string(),
            short_description: None,
            description: "".to_string(),
            authors: vec!["alfa".to_string()],
            outline: vec![
                ModuleStub {
                    name: "uno-module".to_string(),
                    title: "Uno".to_string(),
                    lessons: ["onnu", "rendu", "moonu"]
                        .iter()
                        .map(|n| LessonStub {
                            name: n.to_string(),
                            title: n.to_string(),
                        })
                        .collect(),
                },
                ModuleStub {
                    name: "dos-module".to_string(),
                    title: "Dos".to_string(),
                    lessons: ["naalu", "anju"]
                        .iter()
                        .map(|n| LessonStub {
                            name: n.to_string(),
                            title: n.to_string(),
                        })
                        .collect(),
                },
            ],
        }
    }

    #[test]
    fn test_course_stores_outline_stubs() {
        let c = course();
        assert_eq!(c.key(), "alpha");
        let fields = to_fields(&c).unwrap();
        assert_eq!(fields["outline"][1]["lessons"][0], json!({"name": "naalu", "title": "naalu"}));
        assert_eq!(fields["outline"][0]["lessons"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_registry_decodes_known_and_generic() {
        let registry = DoctypeRegistry::course_doctypes();
        assert!(registry.is_registered("lesson"));
        assert!(!registry.is_registered("number"));

        let mut doc = Document::new("module", "alpha/uno", Map::new());
        doc.id = Some("m1".to_string());
        doc.data = json!({"course": "alpha", "name": "uno", "title": "Uno", "index": 1})
            .as_object()
            .cloned()
            .unwrap();
        match registry.decode(doc).unwrap() {
            Record::Module(m) => {
                assert_eq!(m.id, "m1");
                assert_eq!(m.title, "Uno");
                assert_eq!(m.index, 1);
                assert!(!m.orphan);
            }
            other => panic!("unexpected record {:?}", other),
        }

        let mut number = Document::new("number", "one", Map::new());
        number.id = Some("n1".to_string());
        assert!(matches!(registry.decode(number).unwrap(), Record::Generic(_)));
    }

    #[test]
    fn test_decode_reports_shape_mismatch() {
        let registry = DoctypeRegistry::course_doctypes();
        let mut doc = Document::new("module", "alpha/uno", Map::new());
        doc.id = Some("m1".to_string());
        doc.set_field("course", 7);
        let err = registry.decode(doc).unwrap_err();
        assert!(matches!(err, Error::Decode { ref doctype, .. } if doctype == "module"));
    }

    #[test]
    fn test_typed_serializes_flat_and_photo_is_tagged() {
        let instructor = Instructor {
            key: "bravo".to_string(),
            name: "Bravo Bob".to_string(),
            bio: "Bravo".to_string(),
            photo: Some(PhotoRef::Url("https://example.com".to_string())),
        };
        let fields = to_fields(&instructor).unwrap();
        assert_eq!(fields["photo"], json!({"url": "https://example.com"}));

        let typed = Typed {
            id: "i1".to_string(),
            key: instructor.key(),
            value: instructor,
        };
        let v = serde_json::to_value(&typed).unwrap();
        assert_eq!(v["id"], "i1");
        assert_eq!(v["name"], "Bravo Bob");
        assert_eq!(typed.name, "Bravo Bob");
    }

    #[test]
    fn test_keys() {
        let module = Module {
            course: "alpha".to_string(),
            name: "uno".to_string(),
            title: "Uno".to_string(),
            index: 1,
            orphan: false,
        };
        assert_eq!(module.key(), "alpha/uno");
        assert_eq!(lesson_key("alpha", "uno", "onnu"), "alpha/uno/onnu");
        assert_eq!(Lesson::query().doctype(), Some("lesson"));
    }
}
