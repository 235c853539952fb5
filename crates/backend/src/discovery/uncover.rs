//! Discovery through the `uncover` command-line tool.
//!
//! Runs the tool once per polling pass in JSON mode and turns each stdout
//! line into a [`RawEvent`]. Dropping the stream kills the child process.

use std::process::Stdio;

use futures::{Stream, StreamExt, future, stream};
use tokio::{
  io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader},
  process::Command,
};
use tracing::{debug, trace};

use super::{DiscoveryError, DiscoveryFeed, DiscoveryQuery, EventStream, RawEvent};
use crate::config::DiscoveryConfig;

/// Longest slice of an offending line kept in error messages
const MAX_LINE_IN_ERROR: usize = 200;

#[derive(Debug, Clone)]
pub struct UncoverFeed {
  binary: String,
  limit: u32,
  timeout_secs: u64,
  retries: u32,
}

impl UncoverFeed {
  pub fn new(config: &DiscoveryConfig) -> Self {
    Self {
      binary: config.binary.clone(),
      limit: config.limit,
      timeout_secs: config.timeout_secs,
      retries: config.retries,
    }
  }

  fn args(&self, query: &DiscoveryQuery) -> Vec<String> {
    vec![
      "-q".to_string(),
      query.queries.join(","),
      "-e".to_string(),
      query.providers.join(","),
      "-json".to_string(),
      "-silent".to_string(),
      "-l".to_string(),
      self.limit.to_string(),
      "-timeout".to_string(),
      self.timeout_secs.to_string(),
      "-retry".to_string(),
      self.retries.to_string(),
    ]
  }
}

#[async_trait::async_trait]
impl DiscoveryFeed for UncoverFeed {
  fn name(&self) -> &str {
    "uncover"
  }

  async fn fetch(&self, query: &DiscoveryQuery) -> Result<EventStream, DiscoveryError> {
    let args = self.args(query);
    debug!(binary = %self.binary, ?args, "Spawning discovery tool");

    let mut child = Command::new(&self.binary)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| DiscoveryError::Spawn {
        binary: self.binary.clone(),
        source,
      })?;

    let stdout = child.stdout.take().ok_or_else(|| DiscoveryError::Spawn {
      binary: self.binary.clone(),
      source: std::io::Error::other("stdout not captured"),
    })?;

    // Drain stderr while stdout is read, or the tool stalls on a full pipe
    let stderr_task = child.stderr.take().map(|mut stderr| {
      tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
      })
    });

    let exit = stream::once(async move {
      let status = child.wait().await;
      let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
      };
      match status {
        Ok(status) if status.success() => {
          trace!("Discovery tool exited cleanly");
          None
        }
        Ok(status) => Some(Err(DiscoveryError::Exited {
          status: status.to_string(),
          stderr: stderr.trim().to_string(),
        })),
        Err(e) => Some(Err(DiscoveryError::Io(e))),
      }
    })
    .filter_map(future::ready);

    Ok(line_events(BufReader::new(stdout)).chain(exit).boxed())
  }
}

/// Parse JSON-lines output into events, skipping blank lines.
///
/// A read error is yielded once and ends the stream.
pub(crate) fn line_events<R>(reader: R) -> impl Stream<Item = Result<RawEvent, DiscoveryError>> + Send + 'static
where
  R: AsyncBufRead + Unpin + Send + 'static,
{
  stream::unfold(Some(reader.lines()), |state| async move {
    let mut lines = state?;
    loop {
      match lines.next_line().await {
        Ok(Some(line)) => {
          if let Some(item) = parse_line(&line) {
            return Some((item, Some(lines)));
          }
        }
        Ok(None) => return None,
        Err(e) => return Some((Err(DiscoveryError::Io(e)), None)),
      }
    }
  })
}

/// Parse one output line. Blank lines yield nothing.
pub(crate) fn parse_line(line: &str) -> Option<Result<RawEvent, DiscoveryError>> {
  let line = line.trim();
  if line.is_empty() {
    return None;
  }

  let parsed = match serde_json::from_str::<RawEvent>(line) {
    Ok(value) if value.is_object() => Ok(value),
    Ok(_) => Err(DiscoveryError::Malformed(format!(
      "expected a JSON object: {}",
      truncate(line)
    ))),
    Err(e) => Err(DiscoveryError::Malformed(format!("{}: {}", e, truncate(line)))),
  };
  Some(parsed)
}

fn truncate(line: &str) -> &str {
  match line.char_indices().nth(MAX_LINE_IN_ERROR) {
    Some((idx, _)) => &line[..idx],
    None => line,
  }
}
