//! Outline linker: module → lesson tree to a neighbor-linked sequence.
//!
//! Lessons are flattened in outline order, padded with a `None` sentinel at
//! each end, and walked with a window of three. Every real lesson sits in
//! the middle of exactly one window, which yields its `(prev, current,
//! next)` triple in a single pass:
//!
//! ```text
//!   [None, l1, l2, l3, None]
//!    └─(None, l1, l2)
//!        └─(l1, l2, l3)
//!            └─(l2, l3, None)
//! ```
//!
//! An empty course pads to `[None, None]`, which has no windows and
//! therefore no rows.

use std::collections::HashSet;
use std::fmt;
use std::iter;

use serde::{Deserialize, Serialize};

use crate::doctypes::OutlineEntry;

/// 1-based `(module_index, lesson_index)` of a lesson in its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub module_index: u32,
    pub lesson_index: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.module_index, self.lesson_index)
    }
}

/// Reference to the previous or next lesson of an outline row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub lesson_id: String,
    pub module: String,
    pub lesson: String,
    pub module_index: u32,
    pub lesson_index: u32,
}

impl Neighbor {
    pub fn position(&self) -> Position {
        Position {
            module_index: self.module_index,
            lesson_index: self.lesson_index,
        }
    }
}

/// A persisted module and its lessons, in outline order.
#[derive(Debug, Clone)]
pub struct OutlineModule {
    pub id: String,
    pub name: String,
    pub lessons: Vec<OutlineLesson>,
}

#[derive(Debug, Clone)]
pub struct OutlineLesson {
    pub id: String,
    pub name: String,
}

/// One linked lesson, as produced by [`link_outline`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineLink {
    pub module_id: String,
    pub module: String,
    pub lesson_id: String,
    pub lesson: String,
    pub position: Position,
    pub prev: Option<Neighbor>,
    pub next: Option<Neighbor>,
}

impl OutlineLink {
    pub fn into_entry(self, course: &str) -> OutlineEntry {
        OutlineEntry {
            course: course.to_string(),
            module: self.module,
            lesson: self.lesson,
            module_id: self.module_id,
            lesson_id: self.lesson_id,
            module_index: self.position.module_index,
            lesson_index: self.position.lesson_index,
            prev: self.prev,
            next: self.next,
            orphan: false,
        }
    }
}

struct Slot<'a> {
    module: &'a OutlineModule,
    lesson: &'a OutlineLesson,
    position: Position,
}

impl Slot<'_> {
    fn neighbor(&self) -> Neighbor {
        Neighbor {
            lesson_id: self.lesson.id.clone(),
            module: self.module.name.clone(),
            lesson: self.lesson.name.clone(),
            module_index: self.position.module_index,
            lesson_index: self.position.lesson_index,
        }
    }
}

/// Links every lesson to its neighbors across module boundaries.
pub fn link_outline(modules: &[OutlineModule]) -> Vec<OutlineLink> {
    let slots: Vec<Slot<'_>> = modules
        .iter()
        .enumerate()
        .flat_map(|(mi, module)| {
            module.lessons.iter().enumerate().map(move |(li, lesson)| Slot {
                module,
                lesson,
                position: Position {
                    module_index: mi as u32 + 1,
                    lesson_index: li as u32 + 1,
                },
            })
        })
        .collect();

    let padded: Vec<Option<&Slot<'_>>> = iter::once(None)
        .chain(slots.iter().map(Some))
        .chain(iter::once(None))
        .collect();

    padded
        .windows(3)
        .filter_map(|window| match window {
            [prev, Some(current), next] => Some(OutlineLink {
                module_id: current.module.id.clone(),
                module: current.module.name.clone(),
                lesson_id: current.lesson.id.clone(),
                lesson: current.lesson.name.clone(),
                position: current.position,
                prev: prev.map(Slot::neighbor),
                next: next.map(Slot::neighbor),
            }),
            _ => None,
        })
        .collect()
}

/// Previous rows whose lesson is no longer in `links`, flagged as orphans.
///
/// Their stored positions and neighbors are kept as they were, so anything
/// still pointing at them resolves to the last known outline.
pub fn carry_orphans(previous: &[OutlineEntry], links: &[OutlineLink]) -> Vec<OutlineEntry> {
    let live: HashSet<(&str, &str)> = links
        .iter()
        .map(|l| (l.module.as_str(), l.lesson.as_str()))
        .collect();

    previous
        .iter()
        .filter(|e| !live.contains(&(e.module.as_str(), e.lesson.as_str())))
        .map(|e| OutlineEntry {
            orphan: true,
            ..e.clone()
        })
        .collect()
}
