//! Route publisher
//!
//! Sends envelopes to the broker under `{domain}.{entity}` and, when the route
//! asks for it, mirrors them into a pretty-printed JSON array on disk. The
//! mirror is diagnostic only. A failure of either sink is returned to the
//! dispatcher, which aborts the file; nothing is retried here.

use bytes::Bytes;
use canon_common::broker::{HeaderMap, MessagePublisher};
use canon_common::{CanonError, MessageEnvelope};
use chrono::Local;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::Result;
use crate::route::{BrokerOutput, FileOutput, Route};

const ARRAY_CLOSE: &[u8] = b"\n]\n";

/// Read size used when locating the end of an existing mirror
const TAIL_CHUNK: usize = 8 * 1024;

/// Publishing side of one route, owned by the route's dispatch loop
pub struct Publisher {
    broker: Option<(BrokerOutput, Arc<dyn MessagePublisher>)>,
    subjects: Vec<String>,
    declared: bool,
    mirror_output: Option<FileOutput>,
    mirror: Option<MirrorFile>,
}

impl Publisher {
    /// Build the publisher for `route`
    ///
    /// `broker` must be provided when the route has a broker output.
    pub fn new(route: &Route, broker: Option<Arc<dyn MessagePublisher>>) -> Result<Self> {
        let broker = match (&route.outputs.broker, broker) {
            (Some(output), Some(handle)) => Some((output.clone(), handle)),
            (Some(_), None) => {
                return Err(CanonError::broker(format!(
                    "route '{}' publishes to the broker but no connection is available",
                    route.name
                ))
                .into())
            },
            (None, _) => None,
        };

        Ok(Self {
            broker,
            subjects: vec![format!("{}.>", route.domain)],
            declared: false,
            mirror_output: route.outputs.file.clone(),
            mirror: None,
        })
    }

    /// Prepare the sinks for a new input file
    pub async fn begin_file(&mut self) -> Result<()> {
        if let Some(ref output) = self.mirror_output {
            let path = mirror_path(output);
            self.mirror = Some(MirrorFile::open(&path).await?);
        }
        Ok(())
    }

    /// Publish one envelope to every configured sink
    pub async fn publish(&mut self, envelope: &MessageEnvelope) -> Result<()> {
        if let Some((ref output, ref handle)) = self.broker {
            if output.durable && !self.declared {
                handle.ensure_exchange(&output.exchange, &self.subjects).await?;
                self.declared = true;
            }

            let payload = Bytes::from(envelope.to_bytes()?);
            handle
                .publish(envelope.routing_key(), HeaderMap::new(), payload)
                .await?;
        }

        if let Some(ref mut mirror) = self.mirror {
            mirror.append(&envelope.to_pretty_json()?).await?;
        }

        Ok(())
    }

    /// Close the mirror of the current input file
    pub async fn finish_file(&mut self) -> Result<()> {
        if let Some(mirror) = self.mirror.take() {
            mirror.close().await?;
        }
        Ok(())
    }
}

fn mirror_path(output: &FileOutput) -> PathBuf {
    if !output.timestamp_suffix {
        return output.dir.join(&output.file_name);
    }

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let name = match output.file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, stamp, ext),
        _ => format!("{}_{}", output.file_name, stamp),
    };
    output.dir.join(name)
}

/// JSON array file kept valid after every append
///
/// The closing bracket is rewritten on each append, so the file can be read
/// at any time while an input file is being dispatched.
struct MirrorFile {
    path: PathBuf,
    file: File,
    entries: usize,
}

impl MirrorFile {
    async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        // Reopen an existing array right after its last complete entry
        let (body_len, entries) = match last_entry_end(&mut file).await? {
            Some(end) => (end, 1),
            None => {
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                file.write_all(b"[").await?;
                (1, 0)
            },
        };

        file.set_len(body_len).await?;
        file.seek(SeekFrom::Start(body_len)).await?;
        file.write_all(ARRAY_CLOSE).await?;
        file.flush().await?;

        debug!(path = %path.display(), "Opened file mirror");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
        })
    }

    async fn append(&mut self, pretty_json: &str) -> Result<()> {
        let end = self.file.seek(SeekFrom::End(0)).await?;
        let body_len = end.saturating_sub(ARRAY_CLOSE.len() as u64);
        self.file.set_len(body_len).await?;
        self.file.seek(SeekFrom::Start(body_len)).await?;

        let mut chunk = String::with_capacity(pretty_json.len() + 16);
        chunk.push_str(if self.entries == 0 { "\n" } else { ",\n" });
        for (i, line) in pretty_json.lines().enumerate() {
            if i > 0 {
                chunk.push('\n');
            }
            chunk.push_str("  ");
            chunk.push_str(line);
        }

        self.file.write_all(chunk.as_bytes()).await?;
        self.file.write_all(ARRAY_CLOSE).await?;
        self.entries += 1;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        info!(path = %self.path.display(), entries = self.entries, "File mirror written");
        Ok(())
    }
}

/// Offset just past the last complete top-level entry of a mirror file
///
/// Entries are pretty-printed objects indented by two spaces, so an entry
/// closes on the only lines that are exactly `  }`; nested objects sit
/// deeper. A partially written trailing entry is never matched. Reads
/// backwards from the end in fixed-size chunks.
async fn last_entry_end(file: &mut File) -> std::io::Result<Option<u64>> {
    const ENTRY_END: &[u8] = b"\n  }";

    let mut end = file.metadata().await?.len();
    let mut chunk = vec![0u8; TAIL_CHUNK];

    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK as u64);
        let window = &mut chunk[..(end - start) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(window).await?;

        if let Some(i) = window
            .windows(ENTRY_END.len())
            .rposition(|w| w == ENTRY_END)
        {
            return Ok(Some(start + (i + ENTRY_END.len()) as u64));
        }
        if start == 0 {
            break;
        }
        // Overlap so a match across the chunk boundary is still found
        end = start + ENTRY_END.len() as u64 - 1;
    }

    Ok(None)
}
