//! Two retrieval strategies over a catalog.
//!
//! * [`rank_rated`]: fetch the `candidates` nearest titles, then reorder that
//!   topical shortlist by rating and keep the best `top`.
//! * [`rank_excluding_self`]: nearest titles, minus rows whose title is exactly
//!   the query, for "more like this course" lookups.
//!
//! Both have text-level wrappers ([`search_rated`], [`search_excluding_self`])
//! that encode the query first. Callers that query several catalogs with the
//! same text encode once through [`EncodedQuery`] and reuse the vector.

use std::cmp::Ordering;
use std::fmt;

use crate::catalog::{Catalog, CourseRecord, RatedCourse};
use crate::embedder::{EncodeError, Encoder};
use crate::index::IndexError;

/// Default nearest-neighbor shortlist size for rated catalogs.
pub const DEFAULT_CANDIDATES: usize = 100;
/// Default number of results returned per catalog.
pub const DEFAULT_TOP: usize = 10;

/// Errors surfaced by a single catalog retrieval.
#[derive(Debug)]
pub enum RetrievalError {
    /// The query could not be encoded.
    Encode(EncodeError),
    /// The similarity index refused the search.
    Index(IndexError),
    /// `top` exceeded the candidate shortlist.
    InvalidLimits {
        /// Requested shortlist size.
        candidates: usize,
        /// Requested result count.
        top: usize,
    },
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(err) => write!(f, "{}", err),
            Self::Index(err) => write!(f, "{}", err),
            Self::InvalidLimits { candidates, top } => write!(
                f,
                "top ({}) must not exceed the candidate pool ({})",
                top, candidates
            ),
        }
    }
}

impl std::error::Error for RetrievalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(err) => Some(err),
            Self::Index(err) => Some(err),
            Self::InvalidLimits { .. } => None,
        }
    }
}

impl From<EncodeError> for RetrievalError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<IndexError> for RetrievalError {
    fn from(err: IndexError) -> Self {
        Self::Index(err)
    }
}

/// Shortlist and result sizes for rated retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingLimits {
    candidates: usize,
    top: usize,
}

impl RankingLimits {
    /// Validates `top <= candidates`.
    pub fn new(candidates: usize, top: usize) -> Result<Self, RetrievalError> {
        if top > candidates {
            return Err(RetrievalError::InvalidLimits { candidates, top });
        }
        Ok(Self { candidates, top })
    }

    /// Nearest-neighbor shortlist size (N).
    pub fn candidates(&self) -> usize {
        self.candidates
    }

    /// Result count after reranking.
    pub fn top(&self) -> usize {
        self.top
    }
}

impl Default for RankingLimits {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES,
            top: DEFAULT_TOP,
        }
    }
}

/// Query text together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedQuery {
    text: String,
    vector: Vec<f32>,
}

impl EncodedQuery {
    /// Encodes `text` with `encoder`.
    pub fn encode(text: impl Into<String>, encoder: &dyn Encoder) -> Result<Self, EncodeError> {
        let text = text.into();
        let vector = encoder.encode(&text)?;
        Ok(Self { text, vector })
    }

    /// Pairs text with a vector computed elsewhere.
    pub fn from_parts(text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            vector,
        }
    }

    /// Original query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Query embedding.
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }
}

/// Encodes `text` and runs [`rank_rated`].
pub fn search_rated(
    text: &str,
    encoder: &dyn Encoder,
    catalog: &Catalog<RatedCourse>,
    limits: RankingLimits,
) -> Result<Vec<RatedCourse>, RetrievalError> {
    let query = EncodedQuery::encode(text, encoder)?;
    rank_rated(&query, catalog, limits)
}

/// Encodes `text` and runs [`rank_excluding_self`].
pub fn search_excluding_self<R: CourseRecord + Clone>(
    text: &str,
    encoder: &dyn Encoder,
    catalog: &Catalog<R>,
    top: usize,
) -> Result<Vec<R>, RetrievalError> {
    let query = EncodedQuery::encode(text, encoder)?;
    rank_excluding_self(&query, catalog, top)
}

/// Nearest `candidates` rows reordered by rating (highest first), cut to `top`.
///
/// The sort is stable: equal ratings keep nearest-neighbor order. Unrated rows
/// rank below every rated row.
pub fn rank_rated(
    query: &EncodedQuery,
    catalog: &Catalog<RatedCourse>,
    limits: RankingLimits,
) -> Result<Vec<RatedCourse>, RetrievalError> {
    if limits.top == 0 {
        return Ok(Vec::new());
    }
    let hits = catalog.index().search(query.vector(), limits.candidates)?;
    let mut shortlist: Vec<&RatedCourse> = hits
        .iter()
        .filter_map(|hit| catalog.store().get(hit.row))
        .collect();
    shortlist.sort_by(|a, b| by_rating_desc(a.avg_rating, b.avg_rating));
    shortlist.truncate(limits.top);
    tracing::debug!(
        catalog = catalog.name(),
        candidates = hits.len(),
        returned = shortlist.len(),
        "ranked by rating"
    );
    Ok(shortlist.into_iter().cloned().collect())
}

/// Nearest rows whose title is not exactly the query text, at most `top`.
///
/// The search over-fetches by the number of rows carrying the query's title
/// (at least one), so duplicated titles do not crowd out real neighbors. No
/// back-fill happens beyond that: a shorter list is returned as is.
pub fn rank_excluding_self<R: CourseRecord + Clone>(
    query: &EncodedQuery,
    catalog: &Catalog<R>,
    top: usize,
) -> Result<Vec<R>, RetrievalError> {
    if top == 0 {
        return Ok(Vec::new());
    }
    let excluded = catalog.store().positions_titled(query.text());
    let fetch = top.saturating_add(excluded.len().max(1));
    let hits = catalog.index().search(query.vector(), fetch)?;
    let kept: Vec<R> = hits
        .iter()
        .filter(|hit| !excluded.contains(&hit.row))
        .filter_map(|hit| catalog.store().get(hit.row))
        .take(top)
        .cloned()
        .collect();
    tracing::debug!(
        catalog = catalog.name(),
        excluded = excluded.len(),
        candidates = hits.len(),
        returned = kept.len(),
        "ranked excluding exact title"
    );
    Ok(kept)
}

fn by_rating_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VideoCourse;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct TableEncoder(HashMap<&'static str, Vec<f32>>);

    impl Encoder for TableEncoder {
        fn encode_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EncodeError> {
            inputs
                .iter()
                .map(|text| {
                    self.0.get(text).cloned().ok_or(EncodeError::Rejected {
                        status: 400,
                        body: format!("unknown text {text}"),
                    })
                })
                .collect()
        }
    }

    fn rated(title: &str, avg_rating: Option<f64>) -> RatedCourse {
        RatedCourse {
            title: title.to_string(),
            avg_rating,
            course_url: format!("https://courses.test/{}", title.replace(' ', "-")),
        }
    }

    fn video(title: &str) -> VideoCourse {
        VideoCourse {
            title: title.to_string(),
            url: format!("https://video.test/{}", title.replace(' ', "-")),
            platform: "YouTube".to_string(),
        }
    }

    fn titles<'a, R: CourseRecord + 'a>(rows: impl IntoIterator<Item = &'a R>) -> Vec<String> {
        rows.into_iter().map(|row| row.title().to_string()).collect()
    }

    fn python_catalog() -> Catalog<RatedCourse> {
        Catalog::new(
            "udemy",
            vec![
                rated("Python Basics", Some(4.2)),
                rated("Advanced Python", Some(4.8)),
                rated("Cooking 101", Some(3.9)),
            ],
            vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]],
        )
        .expect("aligned catalog")
    }

    fn python_encoder() -> TableEncoder {
        TableEncoder(HashMap::from([("python programming", vec![1.0, 0.0])]))
    }

    #[test]
    fn higher_rated_match_comes_first() {
        let results = search_rated(
            "python programming",
            &python_encoder(),
            &python_catalog(),
            RankingLimits::default(),
        )
        .expect("search succeeds");
        assert_eq!(
            titles(&results),
            vec!["Advanced Python", "Python Basics", "Cooking 101"]
        );
        assert!(results
            .windows(2)
            .all(|pair| pair[0].avg_rating >= pair[1].avg_rating));
    }

    #[test]
    fn rating_sort_only_sees_the_shortlist() {
        let limits = RankingLimits::new(2, 2).unwrap();
        let results = search_rated(
            "python programming",
            &python_encoder(),
            &python_catalog(),
            limits,
        )
        .unwrap();
        assert_eq!(titles(&results), vec!["Advanced Python", "Python Basics"]);
    }

    #[test]
    fn top_truncates_after_reranking() {
        let query = EncodedQuery::from_parts("python programming", vec![0.0, 1.0]);
        let limits = RankingLimits::new(3, 1).unwrap();
        let results = rank_rated(&query, &python_catalog(), limits).unwrap();
        assert_eq!(titles(&results), vec!["Advanced Python"]);
    }

    #[test]
    fn unrated_rows_sink_and_ties_keep_distance_order() {
        let catalog = Catalog::new(
            "coursera",
            vec![
                rated("near unrated", None),
                rated("near 4.0", Some(4.0)),
                rated("mid 4.0", Some(4.0)),
                rated("far 4.5", Some(4.5)),
            ],
            vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]],
        )
        .unwrap();
        let query = EncodedQuery::from_parts("anything", vec![0.0]);
        let results = rank_rated(&query, &catalog, RankingLimits::default()).unwrap();
        assert_eq!(
            titles(&results),
            vec!["far 4.5", "near 4.0", "mid 4.0", "near unrated"]
        );
    }

    #[test]
    fn zero_top_is_empty_and_oversized_top_is_rejected() {
        let query = EncodedQuery::from_parts("x", vec![1.0, 0.0]);
        let none = rank_rated(&query, &python_catalog(), RankingLimits::new(5, 0).unwrap());
        assert!(none.unwrap().is_empty());

        match RankingLimits::new(5, 6) {
            Err(RetrievalError::InvalidLimits { candidates, top }) => {
                assert_eq!((candidates, top), (5, 6));
            }
            other => panic!("expected invalid limits, got {other:?}"),
        }
    }

    #[test]
    fn encoder_and_index_failures_surface() {
        let err = search_rated(
            "unknown",
            &python_encoder(),
            &python_catalog(),
            RankingLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::Encode(EncodeError::Rejected { .. })));

        let empty: Catalog<RatedCourse> = Catalog::new("empty", Vec::new(), Vec::new()).unwrap();
        let query = EncodedQuery::from_parts("x", vec![1.0]);
        let err = rank_rated(&query, &empty, RankingLimits::default()).unwrap_err();
        assert!(matches!(err, RetrievalError::Index(IndexError::Empty)));
    }

    fn go_catalog() -> Catalog<VideoCourse> {
        Catalog::new(
            "youtube",
            vec![video("Intro to Go"), video("Intro to Go"), video("Intro to Rust")],
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.8, 0.2]],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_self_titles_are_all_excluded() {
        let encoder = TableEncoder(HashMap::from([("Intro to Go", vec![1.0, 0.0])]));
        let results = search_excluding_self("Intro to Go", &encoder, &go_catalog(), 1).unwrap();
        assert_eq!(titles(&results), vec!["Intro to Rust"]);
    }

    #[test]
    fn free_text_queries_exclude_nothing() {
        let query = EncodedQuery::from_parts("go tutorials", vec![1.0, 0.0]);
        let results = rank_excluding_self(&query, &go_catalog(), 2).unwrap();
        assert_eq!(titles(&results), vec!["Intro to Go", "Intro to Go"]);
    }

    #[test]
    fn exclusion_returns_short_lists_without_backfill() {
        let catalog = Catalog::new(
            "youtube",
            vec![video("Only Me"), video("Neighbor")],
            vec![vec![0.0], vec![1.0]],
        )
        .unwrap();
        let query = EncodedQuery::from_parts("Only Me", vec![0.0]);
        let results = rank_excluding_self(&query, &catalog, 10).unwrap();
        assert_eq!(titles(&results), vec!["Neighbor"]);

        let lonely = Catalog::new("youtube", vec![video("Only Me")], vec![vec![0.0]]).unwrap();
        assert!(rank_excluding_self(&query, &lonely, 3).unwrap().is_empty());
        assert!(rank_excluding_self(&query, &catalog, 0).unwrap().is_empty());
    }

    #[test]
    fn results_never_repeat_rows_or_exceed_top() {
        let rows: Vec<RatedCourse> = (0..50u32)
            .map(|i| rated(&format!("course {i}"), Some(f64::from(i % 7))))
            .collect();
        let vectors: Vec<Vec<f32>> = (0..50).map(|i| vec![i as f32, (i % 3) as f32]).collect();
        let catalog = Catalog::new("udemy", rows, vectors).unwrap();
        let query = EncodedQuery::from_parts("q", vec![10.0, 1.0]);
        let results = rank_rated(&query, &catalog, RankingLimits::new(20, 10).unwrap()).unwrap();
        assert_eq!(results.len(), 10);
        let mut seen = titles(&results);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn repeated_rated_queries_return_identical_results() {
        let rows: Vec<RatedCourse> = (0..12u32)
            .map(|i| rated(&format!("tie {i}"), (i % 2 == 0).then_some(4.0)))
            .collect();
        let vectors: Vec<Vec<f32>> = (0..12)
            .map(|i| if i % 3 == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();
        let catalog = Catalog::new("udemy", rows, vectors).unwrap();
        let query = EncodedQuery::from_parts("tied", vec![1.0, 0.0]);
        let limits = RankingLimits::new(8, 5).unwrap();

        let first = rank_rated(&query, &catalog, limits).unwrap();
        let second = rank_rated(&query, &catalog, limits).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            titles(&first),
            vec!["tie 0", "tie 6", "tie 2", "tie 4", "tie 3"]
        );
    }

    fn same_title_catalog() -> Catalog<VideoCourse> {
        let rows: Vec<VideoCourse> = (0..12)
            .map(|i| {
                let mut row = video(&format!("clip {i}"));
                if i % 4 == 0 {
                    row.title = "Same Title".to_string();
                }
                row
            })
            .collect();
        let vectors: Vec<Vec<f32>> = (0..12).map(|i| vec![(i % 2) as f32, 0.0]).collect();
        Catalog::new("youtube", rows, vectors).unwrap()
    }

    #[test]
    fn repeated_exclusion_queries_return_identical_results() {
        let catalog = same_title_catalog();
        let query = EncodedQuery::from_parts("Same Title", vec![0.0, 0.0]);

        let first = rank_excluding_self(&query, &catalog, 5).unwrap();
        let second = rank_excluding_self(&query, &catalog, 5).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            titles(&first),
            vec!["clip 2", "clip 6", "clip 10", "clip 1", "clip 3"]
        );
    }

    #[test]
    fn exclusion_never_repeats_rows_or_exceeds_top() {
        let catalog = same_title_catalog();
        let query = EncodedQuery::from_parts("Same Title", vec![0.0, 0.0]);
        for top in 1..=10 {
            let results = rank_excluding_self(&query, &catalog, top).unwrap();
            assert!(results.len() <= top, "top {top} returned {}", results.len());
            assert!(results.iter().all(|row| row.title != "Same Title"));
            let mut urls: Vec<&str> = results.iter().map(|row| row.url.as_str()).collect();
            urls.sort_unstable();
            urls.dedup();
            assert_eq!(urls.len(), results.len(), "top {top} repeated a row");
        }
    }
}
