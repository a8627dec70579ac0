//! Acquisition stage: fetch raw tiles for one cycle into the data root.
//!
//! Any failure is fatal to the run. There is no retry here; the external
//! scheduler re-invokes the whole pipeline on its next tick.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use bzip2::write::BzDecoder;
use chrono::Duration as ChronoDuration;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use forecast_common::{CycleId, ForecastError, ForecastResult, SourceConfig, WeatherConfig};

use crate::clock::Clock;
use crate::layout::DataLayout;

/// Result of a completed acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredCycle {
    pub cycle: CycleId,
    pub dir: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Populate one cycle directory under the data root. Re-running
    /// overwrites files already present.
    async fn acquire(&self, layout: &DataLayout) -> ForecastResult<AcquiredCycle>;
}

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: String,
    /// Final file name on disk (decompressed)
    pub file_name: String,
    pub variable: String,
    pub step: u32,
}

/// Fetches single-level model output over HTTP from an open-data server
/// laid out as `{base}/{HH}/{variable}/{file}`.
pub struct HttpAcquirer {
    client: Client,
    source: SourceConfig,
    model_slug: String,
    cycle_hours: u32,
    clock: Arc<dyn Clock>,
}

impl HttpAcquirer {
    pub fn new(
        source: SourceConfig,
        weather: &WeatherConfig,
        clock: Arc<dyn Clock>,
    ) -> ForecastResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(source.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(source.max_concurrent)
            .build()
            .map_err(|e| {
                ForecastError::AcquisitionError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            source,
            model_slug: weather.model.to_lowercase(),
            cycle_hours: weather.update_cycle_hours,
            clock,
        })
    }

    /// Latest run expected to be published by now.
    pub fn target_cycle(&self) -> CycleId {
        let reference = self.clock.now() - ChronoDuration::hours(self.source.delay_hours as i64);
        CycleId::at_or_before(reference, self.cycle_hours)
    }

    /// Every file of a cycle, variables outer, steps inner.
    pub fn jobs(&self, cycle: &CycleId) -> Vec<DownloadJob> {
        let steps = self.source.forecast_steps();
        let hour = format!("{:02}", cycle.cycle_hour);
        let stamp = cycle.compact();

        let mut jobs = Vec::with_capacity(self.source.variables.len() * steps.len());
        for variable in &self.source.variables {
            let upper = variable.to_uppercase();
            for &step in &steps {
                let file_name = format!(
                    "{}_europe_regular-lat-lon_single-level_{}_{:03}_{}.grib2",
                    self.model_slug, stamp, step, upper
                );
                jobs.push(DownloadJob {
                    url: format!(
                        "{}/{}/{}/{}.bz2",
                        self.source.base_url, hour, variable, file_name
                    ),
                    file_name,
                    variable: variable.clone(),
                    step,
                });
            }
        }
        jobs
    }

    #[instrument(skip(self, dir), fields(variable = %job.variable, step = job.step))]
    async fn download(&self, job: DownloadJob, dir: &Path) -> ForecastResult<u64> {
        let fail = |msg: String| ForecastError::AcquisitionError(format!("{}: {}", job.url, msg));

        let response = self
            .client
            .get(&job.url)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {}", e)))?;

        match response.status() {
            StatusCode::OK => {}
            status => return Err(fail(format!("HTTP {}", status))),
        }

        let final_path = dir.join(&job.file_name);
        let partial_path = dir.join(format!("{}.partial", job.file_name));
        let compressed = job.url.ends_with(".bz2");

        // Chunks go to a blocking writer that decompresses as they arrive.
        let (tx, mut rx) = mpsc::channel::<Bytes>(WRITER_QUEUE_CHUNKS);
        let writer = {
            let partial_path = partial_path.clone();
            tokio::task::spawn_blocking(move || -> io::Result<u64> {
                let mut sink = PayloadSink::create(&partial_path, compressed)?;
                while let Some(chunk) = rx.blocking_recv() {
                    sink.write_chunk(&chunk)?;
                }
                sink.finish()
            })
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fail(format!("error reading body: {}", e)))?;
            if tx.send(chunk).await.is_err() {
                // Writer has failed; its error is reported below.
                break;
            }
        }
        drop(tx);

        let written = writer
            .await
            .map_err(|e| fail(format!("writer task failed: {}", e)))?
            .map_err(|e| fail(format!("write failed: {}", e)))?;

        fs::rename(&partial_path, &final_path)
            .await
            .map_err(|e| fail(format!("rename failed: {}", e)))?;

        debug!(path = %final_path.display(), bytes = written, "Downloaded file");
        Ok(written)
    }
}

/// Chunks buffered between the response stream and the file writer.
const WRITER_QUEUE_CHUNKS: usize = 16;

/// File writer that counts bytes written.
struct CountingFile {
    file: std::fs::File,
    written: u64,
}

impl Write for CountingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Destination of one download. Truncates any existing file on create.
enum PayloadSink {
    Plain(CountingFile),
    Bzip2(BzDecoder<CountingFile>),
}

impl PayloadSink {
    fn create(path: &Path, bz2: bool) -> io::Result<Self> {
        let out = CountingFile {
            file: std::fs::File::create(path)?,
            written: 0,
        };
        Ok(if bz2 {
            PayloadSink::Bzip2(BzDecoder::new(out))
        } else {
            PayloadSink::Plain(out)
        })
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            PayloadSink::Plain(out) => out.write_all(chunk),
            PayloadSink::Bzip2(decoder) => decoder.write_all(chunk),
        }
    }

    /// Flush pending output, sync to disk and return the bytes written
    /// (decompressed size for bzip2).
    fn finish(&mut self) -> io::Result<u64> {
        let out = match self {
            PayloadSink::Plain(out) => &*out,
            PayloadSink::Bzip2(decoder) => {
                decoder.try_finish()?;
                decoder.get_ref()
            }
        };
        out.file.sync_all()?;
        Ok(out.written)
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    #[instrument(skip(self, layout), fields(root = %layout.root().display()))]
    async fn acquire(&self, layout: &DataLayout) -> ForecastResult<AcquiredCycle> {
        let cycle = self.target_cycle();
        let dir = layout.raw_dir(&cycle);
        fs::create_dir_all(&dir).await.map_err(|e| {
            ForecastError::AcquisitionError(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let jobs = self.jobs(&cycle);
        info!(
            cycle = %cycle,
            files = jobs.len(),
            concurrency = self.source.max_concurrent,
            "Starting acquisition"
        );

        let total = jobs.len();
        let sizes: Vec<u64> = stream::iter(jobs)
            .map(|job| self.download(job, &dir))
            .buffer_unordered(self.source.max_concurrent)
            .try_collect()
            .await?;

        let bytes = sizes.iter().sum();
        info!(cycle = %cycle, files = total, bytes = bytes, "Acquisition complete");

        Ok(AcquiredCycle {
            cycle,
            dir,
            files: total,
            bytes,
        })
    }
}
