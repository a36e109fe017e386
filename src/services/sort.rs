//! Ordering and truncation of filtered entities.
//!
//! The comparator is a total order: the requested column first, then the
//! entity id, then its source. Descending order negates the whole
//! comparison, tie-breaks included.

use crate::models::container::{Container, File};
use crate::models::source::Source;
use std::cmp::Ordering;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    Name,
    Size,
    /// Sorts exactly like `Name`.
    Description,
}

impl SortColumn {
    /// Parse an Apache-style `C=` value.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" | "n" => Some(SortColumn::Name),
            "S" | "s" => Some(SortColumn::Size),
            "D" | "d" => Some(SortColumn::Description),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            SortColumn::Name => "N",
            SortColumn::Size => "S",
            SortColumn::Description => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// Parse an Apache-style `O=` value.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" | "a" => Some(SortOrder::Ascending),
            "D" | "d" => Some(SortOrder::Descending),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            SortOrder::Ascending => "A",
            SortOrder::Descending => "D",
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub column: SortColumn,
    pub order: SortOrder,
}

/// Anything that can appear as a row of a listing.
pub trait Listable {
    fn sort_name(&self) -> &str;
    fn sort_size(&self) -> u64;
    fn sort_id(&self) -> u64;
    fn sort_source(&self) -> Source;
}

impl Listable for Container {
    fn sort_name(&self) -> &str {
        &self.container_name
    }

    fn sort_size(&self) -> u64 {
        self.total_size()
    }

    fn sort_id(&self) -> u64 {
        self.container_id
    }

    fn sort_source(&self) -> Source {
        self.source
    }
}

impl Listable for File {
    fn sort_name(&self) -> &str {
        &self.display_name
    }

    fn sort_size(&self) -> u64 {
        self.size
    }

    fn sort_id(&self) -> u64 {
        self.file_id
    }

    fn sort_source(&self) -> Source {
        self.source
    }
}

impl<T: Listable + ?Sized> Listable for &T {
    fn sort_name(&self) -> &str {
        (**self).sort_name()
    }

    fn sort_size(&self) -> u64 {
        (**self).sort_size()
    }

    fn sort_id(&self) -> u64 {
        (**self).sort_id()
    }

    fn sort_source(&self) -> Source {
        (**self).sort_source()
    }
}

/// Case-insensitive, accent-aware name collation.
///
/// Names are compared first on their base letters (canonical decomposition
/// with combining marks dropped, then lower-cased), so `éclair` sorts
/// between `dune` and `ezra` rather than after `z`. Names equal at that
/// level are ordered by their lower-cased form, which puts `resume` before
/// `résumé`. Case alone never orders two names.
pub fn collate(left: &str, right: &str) -> Ordering {
    base_letters(left)
        .cmp(base_letters(right))
        .then_with(|| folded(left).cmp(folded(right)))
}

fn base_letters(name: &str) -> impl Iterator<Item = char> + '_ {
    name.nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
}

fn folded(name: &str) -> impl Iterator<Item = char> + '_ {
    name.nfd().flat_map(char::to_lowercase)
}

pub fn compare<T: Listable>(left: &T, right: &T, spec: SortSpec) -> Ordering {
    let primary = match spec.column {
        SortColumn::Name | SortColumn::Description => {
            collate(left.sort_name(), right.sort_name())
        }
        SortColumn::Size => left.sort_size().cmp(&right.sort_size()),
    };
    let ordering = primary
        .then_with(|| left.sort_id().cmp(&right.sort_id()))
        .then_with(|| left.sort_source().cmp(&right.sort_source()));

    match spec.order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

/// Matched entities after ordering and truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    pub items: Vec<T>,
    /// Number of matches before truncation.
    pub total: usize,
}

/// Keep what `keep` accepts, order it by `spec` and cut it to `limit`.
pub fn select<I, T, F>(items: I, keep: F, spec: SortSpec, limit: usize) -> Selection<T>
where
    I: IntoIterator<Item = T>,
    T: Listable,
    F: Fn(&T) -> bool,
{
    let mut matched: Vec<T> = items.into_iter().filter(|item| keep(item)).collect();
    let total = matched.len();
    matched.sort_by(|left, right| compare(left, right, spec));
    matched.truncate(limit);
    Selection {
        items: matched,
        total,
    }
}
