//! FilePump - feeds newline-delimited records from a file or stdin

use std::path::PathBuf;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::error::{IngestionError, Result};
use crate::stream::SharedStream;

/// Reads one record per line and appends it to a [`SharedStream`].
///
/// Blank lines are skipped. The path `-` reads stdin.
pub struct FilePump {
    path: PathBuf,
    stream: SharedStream,
    close_on_eof: bool,
}

impl FilePump {
    pub fn new(path: impl Into<PathBuf>, stream: SharedStream) -> Self {
        Self {
            path: path.into(),
            stream,
            close_on_eof: true,
        }
    }

    /// Leave the stream open after the input ends.
    pub fn keep_open(mut self) -> Self {
        self.close_on_eof = false;
        self
    }

    /// Pump until end of input or until the stream is closed.
    ///
    /// Returns the number of records appended.
    #[instrument(name = "file_pump_run", skip(self), fields(path = %self.path.display(), stream = %self.stream.name()))]
    pub async fn run(self) -> Result<u64> {
        let result = self.pump().await;
        if self.close_on_eof {
            self.stream.close();
        }
        if let Ok(count) = &result {
            info!(records = count, "input exhausted");
        }
        result
    }

    /// Spawn the pump as a background task
    pub fn spawn(self) -> JoinHandle<Result<u64>> {
        tokio::spawn(self.run())
    }

    async fn pump(&self) -> Result<u64> {
        let reader = self.open().await?;
        let mut lines = reader.lines();
        let mut count = 0u64;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(source) => return Err(self.read_error(source)),
            };
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match self.stream.append(Bytes::copy_from_slice(line.as_bytes())).await {
                Ok(_) => count += 1,
                Err(IngestionError::Closed { .. }) => {
                    debug!(records = count, "stream closed while pumping");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    async fn open(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        if self.path.as_os_str() == "-" {
            return Ok(Box::new(BufReader::new(tokio::io::stdin())));
        }
        let file = File::open(&self.path)
            .await
            .map_err(|source| self.read_error(source))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn read_error(&self, source: std::io::Error) -> IngestionError {
        IngestionError::Read {
            path: self.path.display().to_string(),
            source,
        }
    }
}
