#![warn(missing_docs)]
//! Course recommendations by title similarity across three catalogs.

pub mod api;
pub mod catalog;
pub mod config;
pub mod embedder;
pub mod index;
pub mod recommend;
pub mod retrieval;
pub mod telemetry;

pub use api::{router, serve, ApiState};
pub use catalog::{Catalog, CatalogStore, CourseRecord, RatedCourse, VideoCourse};
pub use embedder::{EncodeError, Encoder};
pub use index::{FlatIndex, IndexError, Neighbor};
pub use recommend::{Catalogs, RecommendError, Recommendations, Recommender};
pub use retrieval::{
    rank_excluding_self, rank_rated, search_excluding_self, search_rated, EncodedQuery,
    RankingLimits, RetrievalError,
};
