//! Application context answering one query against all three catalogs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::catalog::{Catalog, CourseRecord, RatedCourse, VideoCourse};
use crate::embedder::{EncodeError, Encoder};
use crate::retrieval::{
    rank_excluding_self, rank_rated, EncodedQuery, RankingLimits, RetrievalError,
};

/// Response key and log label of the generic-platform catalog.
pub const UDEMY: &str = "udemy";
/// Response key and log label of the specific-platform catalog.
pub const COURSERA: &str = "coursera";
/// Response key and log label of the video catalog.
pub const YOUTUBE: &str = "youtube";

/// Course and vector files for one catalog.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Course rows (JSONL).
    pub courses: PathBuf,
    /// Aligned vector table (JSONL).
    pub vectors: PathBuf,
}

/// The three catalogs served by a [`Recommender`].
#[derive(Debug, Clone)]
pub struct Catalogs {
    /// Generic course platform.
    pub udemy: Catalog<RatedCourse>,
    /// Specific course platform.
    pub coursera: Catalog<RatedCourse>,
    /// Video platform; queried with exact-title exclusion.
    pub youtube: Catalog<VideoCourse>,
}

impl Catalogs {
    /// Loads all catalogs, failing on the first bad artifact.
    pub fn load(
        udemy: &ArtifactPaths,
        coursera: &ArtifactPaths,
        youtube: &ArtifactPaths,
    ) -> Result<Self> {
        Ok(Self {
            udemy: Catalog::load(UDEMY, &udemy.courses, &udemy.vectors)?,
            coursera: Catalog::load(COURSERA, &coursera.courses, &coursera.vectors)?,
            youtube: Catalog::load(YOUTUBE, &youtube.courses, &youtube.vectors)?,
        })
    }

    /// Name, vector dimension and first title of every non-empty catalog.
    fn loaded(&self) -> Vec<(&str, usize, &str)> {
        fn first<R: CourseRecord>(catalog: &Catalog<R>) -> Option<(&str, usize, &str)> {
            let row = catalog.store().get(0)?;
            Some((catalog.name(), catalog.dim(), row.title()))
        }
        [first(&self.udemy), first(&self.coursera), first(&self.youtube)]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Per-request failure that prevents any catalog from being searched.
#[derive(Debug)]
pub enum RecommendError {
    /// The query was missing or whitespace-only.
    EmptyQuery,
    /// The shared query embedding could not be computed.
    Encode(EncodeError),
    /// A worker task died before producing the embedding.
    Internal(String),
}

impl fmt::Display for RecommendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyQuery => write!(f, "query must not be empty"),
            Self::Encode(err) => write!(f, "{}", err),
            Self::Internal(reason) => write!(f, "internal error: {}", reason),
        }
    }
}

impl std::error::Error for RecommendError {}

/// Combined response. A catalog that failed has an empty list and an entry in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendations {
    /// Generic-platform matches, best rated first.
    pub udemy: Vec<RatedCourse>,
    /// Specific-platform matches, best rated first.
    pub coursera: Vec<RatedCourse>,
    /// Video matches, nearest first.
    pub youtube: Vec<VideoCourse>,
    /// Catalog name to failure message.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// Row count and dimension of a loaded catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    /// Catalog label.
    pub name: String,
    /// Loaded rows.
    pub rows: usize,
    /// Vector dimension.
    pub dim: usize,
}

/// Encoder, catalogs and ranking limits, built once at startup and shared by every request.
pub struct Recommender {
    encoder: Arc<dyn Encoder>,
    udemy: Arc<Catalog<RatedCourse>>,
    coursera: Arc<Catalog<RatedCourse>>,
    youtube: Arc<Catalog<VideoCourse>>,
    dim: Option<usize>,
    limits: RankingLimits,
}

impl Recommender {
    /// Assembles the context.
    ///
    /// Every non-empty catalog must share one dimension, and the encoder must produce
    /// vectors of that dimension; one catalog title is encoded to check it.
    pub fn new(encoder: Arc<dyn Encoder>, catalogs: Catalogs, limits: RankingLimits) -> Result<Self> {
        let loaded = catalogs.loaded();
        if let Some(&(first, want, _)) = loaded.first() {
            for &(name, dim, _) in &loaded[1..] {
                anyhow::ensure!(
                    dim == want,
                    "catalog {name} has {dim}-dimensional vectors but {first} has {want}"
                );
            }
        }
        let dim = match loaded.first() {
            Some(&(name, want, title)) => {
                let sample = encoder.encode(title).with_context(|| {
                    format!("failed to encode a {name} title with the configured encoder")
                })?;
                anyhow::ensure!(
                    sample.len() == want,
                    "encoder produces {}-dimensional vectors but catalog {name} has {want}; \
                     use the model that built the vector tables",
                    sample.len()
                );
                Some(want)
            }
            None => None,
        };
        Ok(Self {
            encoder,
            udemy: Arc::new(catalogs.udemy),
            coursera: Arc::new(catalogs.coursera),
            youtube: Arc::new(catalogs.youtube),
            dim,
            limits,
        })
    }

    /// Ranking limits applied to every catalog.
    pub fn limits(&self) -> RankingLimits {
        self.limits
    }

    /// Row counts and dimensions of the loaded catalogs.
    pub fn summary(&self) -> Vec<CatalogSummary> {
        fn describe<R: CourseRecord>(catalog: &Catalog<R>) -> CatalogSummary {
            CatalogSummary {
                name: catalog.name().to_string(),
                rows: catalog.len(),
                dim: catalog.dim(),
            }
        }
        vec![
            describe(&*self.udemy),
            describe(&*self.coursera),
            describe(&*self.youtube),
        ]
    }

    /// Encodes `text` once, then searches the three catalogs concurrently.
    pub async fn recommend(&self, text: &str) -> Result<Recommendations, RecommendError> {
        if text.trim().is_empty() {
            return Err(RecommendError::EmptyQuery);
        }
        let start = Instant::now();
        let query = {
            let encoder = Arc::clone(&self.encoder);
            let text = text.to_string();
            tokio::task::spawn_blocking(move || EncodedQuery::encode(text, encoder.as_ref()))
                .await
                .map_err(|err| RecommendError::Internal(format!("encoder task failed: {err}")))?
                .map_err(RecommendError::Encode)?
        };
        if let Some(want) = self.dim {
            if query.vector().len() != want {
                return Err(RecommendError::Encode(EncodeError::Malformed(format!(
                    "query embedding has {} dimensions but the catalogs have {}",
                    query.vector().len(),
                    want
                ))));
            }
        }
        let query = Arc::new(query);
        let top = self.limits.top();

        let udemy = {
            let (query, catalog, limits) = (Arc::clone(&query), Arc::clone(&self.udemy), self.limits);
            run_blocking(UDEMY, move || rank_rated(&query, &*catalog, limits))
        };
        let coursera = {
            let (query, catalog, limits) =
                (Arc::clone(&query), Arc::clone(&self.coursera), self.limits);
            run_blocking(COURSERA, move || rank_rated(&query, &*catalog, limits))
        };
        let youtube = {
            let (query, catalog) = (Arc::clone(&query), Arc::clone(&self.youtube));
            run_blocking(YOUTUBE, move || rank_excluding_self(&query, &*catalog, top))
        };
        let (udemy, coursera, youtube) = tokio::join!(udemy, coursera, youtube);

        let mut errors = BTreeMap::new();
        let response = Recommendations {
            udemy: settle(UDEMY, udemy, &mut errors),
            coursera: settle(COURSERA, coursera, &mut errors),
            youtube: settle(YOUTUBE, youtube, &mut errors),
            errors,
        };
        tracing::info!(
            query_len = text.len(),
            udemy = response.udemy.len(),
            coursera = response.coursera.len(),
            youtube = response.youtube.len(),
            failed = response.errors.len(),
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "recommendations served"
        );
        Ok(response)
    }
}

async fn run_blocking<T, F>(name: &'static str, task: F) -> Result<Vec<T>, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<Vec<T>, RetrievalError> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(Ok(rows)) => Ok(rows),
        Ok(Err(err)) => {
            tracing::warn!(catalog = name, error = %err, "catalog retrieval failed");
            Err(err.to_string())
        }
        Err(err) => {
            tracing::warn!(catalog = name, error = %err, "catalog retrieval task aborted");
            Err(format!("retrieval task failed: {err}"))
        }
    }
}

fn settle<T>(
    name: &str,
    outcome: Result<Vec<T>, String>,
    errors: &mut BTreeMap<String, String>,
) -> Vec<T> {
    outcome.unwrap_or_else(|message| {
        errors.insert(name.to_string(), message);
        Vec::new()
    })
}
