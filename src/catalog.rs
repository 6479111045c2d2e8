//! Course catalogs: typed row stores joined by position to their vector tables.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::index::FlatIndex;

/// Anything stored in a catalog row.
pub trait CourseRecord: DeserializeOwned + Send + Sync + 'static {
    /// Title used both for embedding and for exact-match exclusion.
    fn title(&self) -> &str;
}

/// Row of a rated catalog (generic and specific course platforms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedCourse {
    /// Course title.
    pub title: String,
    /// Average learner rating; unrated courses carry `None`.
    #[serde(default)]
    pub avg_rating: Option<f64>,
    /// Landing page.
    pub course_url: String,
}

impl CourseRecord for RatedCourse {
    fn title(&self) -> &str {
        &self.title
    }
}

/// Row of the video catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCourse {
    /// Playlist or video title.
    pub title: String,
    /// Watch URL.
    pub url: String,
    /// Hosting platform label.
    pub platform: String,
}

impl CourseRecord for VideoCourse {
    fn title(&self) -> &str {
        &self.title
    }
}

/// Immutable rows plus a title lookup built once at load time.
#[derive(Debug, Clone)]
pub struct CatalogStore<R> {
    rows: Vec<R>,
    by_title: HashMap<String, Vec<usize>>,
}

impl<R: CourseRecord> CatalogStore<R> {
    /// Wraps rows, indexing them by exact title.
    pub fn new(rows: Vec<R>) -> Self {
        let mut by_title: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, row) in rows.iter().enumerate() {
            by_title
                .entry(row.title().to_string())
                .or_default()
                .push(position);
        }
        Self { rows, by_title }
    }

    /// Row at `position`, if any.
    pub fn get(&self, position: usize) -> Option<&R> {
        self.rows.get(position)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the store has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every row whose title equals `title` byte for byte.
    pub fn positions_titled(&self, title: &str) -> &[usize] {
        self.by_title.get(title).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates rows in position order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.iter()
    }
}

/// A catalog store and the similarity index built from its vector table.
#[derive(Debug, Clone)]
pub struct Catalog<R> {
    name: String,
    store: CatalogStore<R>,
    index: FlatIndex,
}

impl<R: CourseRecord> Catalog<R> {
    /// Pairs rows with their vectors, failing when the row counts differ.
    pub fn new(name: impl Into<String>, rows: Vec<R>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let name = name.into();
        anyhow::ensure!(
            rows.len() == vectors.len(),
            "catalog {name}: {} course rows but {} vectors",
            rows.len(),
            vectors.len()
        );
        let index = FlatIndex::build(vectors)
            .with_context(|| format!("catalog {name}: invalid vector table"))?;
        Ok(Self {
            name,
            store: CatalogStore::new(rows),
            index,
        })
    }

    /// Loads a catalog from a course JSONL file and its aligned vector JSONL file.
    pub fn load(name: impl Into<String>, courses: &Path, vectors: &Path) -> Result<Self> {
        let name = name.into();
        let rows: Vec<R> = read_jsonl(courses)
            .with_context(|| format!("catalog {name}: failed to load courses"))?;
        let table: Vec<Vec<f32>> = read_jsonl(vectors)
            .with_context(|| format!("catalog {name}: failed to load vectors"))?;
        let catalog = Self::new(name, rows, table)?;
        if catalog.is_empty() {
            tracing::warn!(catalog = %catalog.name, "catalog loaded with no rows");
        } else {
            tracing::info!(
                catalog = %catalog.name,
                rows = catalog.len(),
                dim = catalog.dim(),
                "catalog loaded"
            );
        }
        Ok(catalog)
    }

    /// Catalog label used in logs and responses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Row store.
    pub fn store(&self) -> &CatalogStore<R> {
        &self.store
    }

    /// Similarity index over the rows.
    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when no rows were loaded.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Vector dimensionality (0 when empty).
    pub fn dim(&self) -> usize {
        self.index.dim()
    }
}

/// Reads one JSON value per non-blank line.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} of {}", line_no + 1, path.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line)
            .with_context(|| format!("invalid record at {}:{}", path.display(), line_no + 1))?;
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn jsonl(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write fixture");
        }
        file
    }

    fn video(title: &str) -> VideoCourse {
        VideoCourse {
            title: title.to_string(),
            url: format!("https://video.test/{}", title.len()),
            platform: "YouTube".to_string(),
        }
    }

    #[test]
    fn duplicate_titles_map_to_every_position() {
        let store = CatalogStore::new(vec![
            video("Intro to Go"),
            video("Intro to Rust"),
            video("Intro to Go"),
        ]);
        assert_eq!(store.positions_titled("Intro to Go"), &[0, 2]);
        assert_eq!(store.positions_titled("Intro to Rust"), &[1]);
        assert!(store.positions_titled("intro to go").is_empty());
    }

    #[test]
    fn loads_aligned_artifacts() {
        let courses = jsonl(&[
            r#"{"title":"Python Basics","avg_rating":4.2,"course_url":"https://u.test/py","num_reviews":10}"#,
            "",
            r#"{"title":"Unrated","course_url":"https://u.test/none"}"#,
        ]);
        let vectors = jsonl(&["[1.0, 0.0]", "[0.0, 1.0]"]);
        let catalog: Catalog<RatedCourse> =
            Catalog::load("udemy", courses.path(), vectors.path()).expect("loads");
        assert_eq!(catalog.name(), "udemy");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.dim(), 2);
        assert_eq!(catalog.store().get(1).unwrap().avg_rating, None);
        assert_eq!(catalog.store().get(0).unwrap().avg_rating, Some(4.2));
    }

    #[test]
    fn row_count_mismatch_is_fatal() {
        let courses = jsonl(&[r#"{"title":"Solo","url":"u","platform":"p"}"#]);
        let vectors = jsonl(&["[1.0]", "[2.0]"]);
        let err = Catalog::<VideoCourse>::load("youtube", courses.path(), vectors.path())
            .unwrap_err();
        assert!(err.to_string().contains("1 course rows but 2 vectors"), "{err}");
    }

    #[test]
    fn malformed_line_reports_position() {
        let courses = jsonl(&[r#"{"title":"ok","url":"u","platform":"p"}"#, "{not json"]);
        let err = read_jsonl::<VideoCourse>(courses.path()).unwrap_err();
        assert!(format!("{err}").ends_with(":2"), "{err}");
    }

    #[test]
    fn ragged_vectors_are_rejected() {
        let err = Catalog::new(
            "coursera",
            vec![video("a"), video("b")],
            vec![vec![1.0, 2.0], vec![3.0]],
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("does not match index dimension"), "{err:#}");
    }

    #[test]
    fn missing_file_is_an_error() {
        let vectors = jsonl(&[]);
        let missing = Path::new("/definitely/not/here.jsonl");
        assert!(Catalog::<VideoCourse>::load("youtube", missing, vectors.path()).is_err());
    }
}
