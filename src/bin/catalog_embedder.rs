use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use coursefind::catalog::read_jsonl;
use coursefind::config::{EncoderArgs, LogFormat};
use coursefind::embedder::openai::{OpenAiEmbedder, OpenAiSettings};
use coursefind::{telemetry, Encoder};
use crossbeam_channel::{bounded, Receiver, Sender};

#[derive(Parser, Debug)]
#[command(
    name = "coursefind-embed",
    about = "Encode catalog titles into a row-aligned vector table"
)]
struct EmbedCli {
    /// Course rows (JSONL); every row needs a string `title`.
    #[arg(long, env = "COURSEFIND_EMBED_INPUT")]
    input: PathBuf,

    /// Vector table to write (JSONL, one array per row).
    #[arg(long, env = "COURSEFIND_EMBED_OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    encoder: EncoderArgs,

    /// Attempts per embedding batch before giving up; throttling and server errors are retried.
    #[arg(
        long = "embedding-max-attempts",
        env = "COURSEFIND_EMBEDDING_MAX_ATTEMPTS",
        default_value_t = 5
    )]
    max_attempts: usize,

    /// Number of concurrent embedding workers.
    #[arg(long, env = "COURSEFIND_EMBED_THREADS", default_value_t = 1)]
    worker_threads: usize,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl EmbedCli {
    fn settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            max_attempts: self.max_attempts.max(1),
            ..self.encoder.settings()
        }
    }
}

fn main() -> Result<()> {
    let cli = EmbedCli::parse();
    telemetry::init(cli.log_format)?;
    let encoder: Arc<dyn Encoder> = Arc::new(OpenAiEmbedder::new(cli.settings())?);
    let titles = read_titles(&cli.input)?;
    let output = File::create(&cli.output)
        .with_context(|| format!("failed to create {}", cli.output.display()))?;
    let mut writer = BufWriter::new(output);
    let written = embed_titles(&titles, encoder, cli.worker_threads, &mut writer)?;
    writer.flush()?;
    tracing::info!(
        rows = written,
        output = %cli.output.display(),
        "vector table written"
    );
    Ok(())
}

fn read_titles(path: &Path) -> Result<Vec<String>> {
    let rows: Vec<serde_json::Value> = read_jsonl(path)?;
    rows.into_iter()
        .enumerate()
        .map(|(position, row)| {
            row.get("title")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("row {} of {} has no string title", position, path.display()))
        })
        .collect()
}

struct EmbeddingTask {
    id: usize,
    titles: Vec<String>,
}

struct EmbeddedBatch {
    id: usize,
    vectors: Vec<Vec<f32>>,
}

type EmbeddingResult = Result<EmbeddedBatch>;

/// Encodes `titles` on a worker pool and writes one vector per line, in input order.
fn embed_titles<W: Write>(
    titles: &[String],
    encoder: Arc<dyn Encoder>,
    worker_threads: usize,
    writer: &mut W,
) -> Result<usize> {
    let worker_threads = worker_threads.max(1);
    let batch_size = encoder.max_batch().max(1);
    let total_batches = titles.len().div_ceil(batch_size);
    tracing::info!(
        rows = titles.len(),
        batch_size,
        workers = worker_threads,
        "embedding catalog titles"
    );

    let (task_tx, task_rx) = bounded::<EmbeddingTask>(worker_threads * 2);
    let (result_tx, result_rx) = bounded::<EmbeddingResult>(worker_threads * 2);
    for worker_id in 0..worker_threads {
        let worker_rx = task_rx.clone();
        let worker_tx = result_tx.clone();
        let worker_encoder = Arc::clone(&encoder);
        thread::spawn(move || worker_loop(worker_id, worker_rx, worker_tx, worker_encoder));
    }
    drop(task_rx);
    drop(result_tx);

    thread::scope(|scope| {
        scope.spawn(move || {
            for (id, chunk) in titles.chunks(batch_size).enumerate() {
                let task = EmbeddingTask {
                    id,
                    titles: chunk.to_vec(),
                };
                if task_tx.send(task).is_err() {
                    break;
                }
            }
        });
        write_in_order(result_rx, total_batches, writer)
    })
}

// Takes the receiver by value so an early error drops it and unblocks the workers.
fn write_in_order<W: Write>(
    results: Receiver<EmbeddingResult>,
    total_batches: usize,
    writer: &mut W,
) -> Result<usize> {
    let mut ready: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
    let mut next_id = 0usize;
    let mut written = 0usize;
    for result in results.iter() {
        let batch = result?;
        ready.insert(batch.id, batch.vectors);
        while let Some(vectors) = ready.remove(&next_id) {
            for vector in vectors {
                serde_json::to_writer(&mut *writer, &vector)?;
                writer.write_all(b"\n")?;
                written += 1;
            }
            next_id += 1;
            if next_id % 50 == 0 {
                tracing::info!(batches = next_id, total_batches, "progress");
            }
        }
    }
    anyhow::ensure!(
        next_id == total_batches,
        "embedding workers stopped after {} of {} batches",
        next_id,
        total_batches
    );
    Ok(written)
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<EmbeddingTask>,
    sender: Sender<EmbeddingResult>,
    encoder: Arc<dyn Encoder>,
) {
    for task in receiver.iter() {
        let EmbeddingTask { id, titles } = task;
        tracing::debug!(worker_id, batch = id, rows = titles.len(), "embedding batch");
        let inputs: Vec<&str> = titles.iter().map(String::as_str).collect();
        let result = encoder
            .encode_batch(&inputs)
            .map_err(|err| anyhow!("worker {} failed batch {}: {}", worker_id, id, err))
            .and_then(|vectors| {
                anyhow::ensure!(
                    vectors.len() == titles.len(),
                    "batch {} returned {} vectors for {} titles",
                    id,
                    vectors.len(),
                    titles.len()
                );
                Ok(EmbeddedBatch { id, vectors })
            });
        if sender.send(result).is_err() {
            break;
        }
    }
}
