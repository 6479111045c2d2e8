//! Command-line and environment configuration shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};

use crate::embedder::openai::OpenAiSettings;
use crate::recommend::ArtifactPaths;
use crate::retrieval::{RankingLimits, DEFAULT_CANDIDATES, DEFAULT_TOP};

/// Log output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Encoder connection flags.
#[derive(Args, Debug, Clone)]
pub struct EncoderArgs {
    /// Base URL of the OpenAI-compatible embeddings API.
    #[arg(
        long = "embedding-base-url",
        env = "COURSEFIND_EMBEDDING_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub base_url: String,

    /// Embedding model identifier; must match the model that built the vector tables.
    #[arg(
        long = "embedding-model",
        env = "COURSEFIND_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub model: String,

    /// API key (optional for self-hosted servers).
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Optional embedding dimension override.
    #[arg(long = "embedding-dimensions", env = "COURSEFIND_EMBEDDING_DIMENSIONS")]
    pub dimensions: Option<usize>,

    /// Seconds before an embedding request times out.
    #[arg(
        long = "embedding-timeout-secs",
        env = "COURSEFIND_EMBEDDING_TIMEOUT_SECS",
        default_value_t = 30
    )]
    pub timeout_secs: u64,

    /// Max inputs per embedding request.
    #[arg(
        long = "embedding-batch",
        env = "COURSEFIND_EMBEDDING_BATCH",
        default_value_t = 32
    )]
    pub batch_size: usize,
}

impl EncoderArgs {
    /// Converts flags into client settings that make a single attempt per request.
    pub fn settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.openai_api_key.clone(),
            dimensions: self.dimensions,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_attempts: 1,
            batch_size: self.batch_size.max(1),
        }
    }
}

/// Artifact locations for the three catalogs.
#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    /// Generic-platform course rows (JSONL).
    #[arg(long, env = "COURSEFIND_UDEMY_COURSES", default_value = "data/udemy_courses.jsonl")]
    pub udemy_courses: PathBuf,

    /// Generic-platform vector table (JSONL).
    #[arg(long, env = "COURSEFIND_UDEMY_VECTORS", default_value = "data/udemy_vectors.jsonl")]
    pub udemy_vectors: PathBuf,

    /// Specific-platform course rows (JSONL).
    #[arg(
        long,
        env = "COURSEFIND_COURSERA_COURSES",
        default_value = "data/coursera_courses.jsonl"
    )]
    pub coursera_courses: PathBuf,

    /// Specific-platform vector table (JSONL).
    #[arg(
        long,
        env = "COURSEFIND_COURSERA_VECTORS",
        default_value = "data/coursera_vectors.jsonl"
    )]
    pub coursera_vectors: PathBuf,

    /// Video course rows (JSONL).
    #[arg(
        long,
        env = "COURSEFIND_YOUTUBE_COURSES",
        default_value = "data/youtube_courses.jsonl"
    )]
    pub youtube_courses: PathBuf,

    /// Video vector table (JSONL).
    #[arg(
        long,
        env = "COURSEFIND_YOUTUBE_VECTORS",
        default_value = "data/youtube_vectors.jsonl"
    )]
    pub youtube_vectors: PathBuf,
}

impl CatalogArgs {
    /// Generic-platform artifacts.
    pub fn udemy(&self) -> ArtifactPaths {
        ArtifactPaths {
            courses: self.udemy_courses.clone(),
            vectors: self.udemy_vectors.clone(),
        }
    }

    /// Specific-platform artifacts.
    pub fn coursera(&self) -> ArtifactPaths {
        ArtifactPaths {
            courses: self.coursera_courses.clone(),
            vectors: self.coursera_vectors.clone(),
        }
    }

    /// Video artifacts.
    pub fn youtube(&self) -> ArtifactPaths {
        ArtifactPaths {
            courses: self.youtube_courses.clone(),
            vectors: self.youtube_vectors.clone(),
        }
    }
}

/// Flags for the recommendation server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "coursefind-api",
    about = "HTTP API recommending courses by title similarity"
)]
pub struct ServeCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "COURSEFIND_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Course rows and vector tables of the three catalogs.
    #[command(flatten)]
    pub catalogs: CatalogArgs,

    /// Nearest neighbors fetched before rating-based reranking.
    #[arg(long, env = "COURSEFIND_CANDIDATE_POOL", default_value_t = DEFAULT_CANDIDATES)]
    pub candidate_pool: usize,

    /// Results returned per catalog.
    #[arg(long, env = "COURSEFIND_TOP", default_value_t = DEFAULT_TOP)]
    pub top: usize,

    /// Query encoder connection; requests are never retried.
    #[command(flatten)]
    pub encoder: EncoderArgs,

    /// Value of the Access-Control-Allow-Origin response header.
    #[arg(long, env = "COURSEFIND_CORS_ORIGIN", default_value = "*")]
    pub cors_allow_origin: String,

    /// Log output format.
    #[arg(long, env = "COURSEFIND_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ServeCli {
    /// Validated ranking limits.
    pub fn ranking_limits(&self) -> anyhow::Result<RankingLimits> {
        Ok(RankingLimits::new(self.candidate_pool, self.top)?)
    }
}
