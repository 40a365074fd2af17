//! Filesystem provider: the collaborator servicing jailed file callbacks.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::{ClientError, Result};

/// Text file access on behalf of the agent.
///
/// Paths handed to a provider have already been resolved and jailed by the
/// session manager; implementations only perform the I/O.
pub trait FsProvider: Send + Sync {
    /// Read a text file, optionally windowed by a 1-based `line` offset and
    /// a `limit` of lines. A `limit` without a `line` returns the first
    /// `limit` lines.
    fn read_text_file(
        &self,
        path: PathBuf,
        line: Option<u64>,
        limit: Option<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Write `content` to a text file, creating or truncating it.
    fn write_text_file(
        &self,
        path: PathBuf,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Default provider over the local filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FsProvider for LocalFs {
    fn read_text_file(
        &self,
        path: PathBuf,
        line: Option<u64>,
        limit: Option<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| ClientError::Io(format!("read {}: {err}", path.display())))?;
            Ok(window_lines(&text, line, limit))
        })
    }

    fn write_text_file(
        &self,
        path: PathBuf,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            tokio::fs::write(&path, content)
                .await
                .map_err(|err| ClientError::Io(format!("write {}: {err}", path.display())))
        })
    }
}

/// Apply the 1-based `line` offset and `limit` window to `text`.
///
/// Lines keep their terminators (`\n` or `\r\n`), so the result is a
/// byte-faithful slice of `text`.
#[must_use]
pub fn window_lines(text: &str, line: Option<u64>, limit: Option<u64>) -> String {
    if line.is_none() && limit.is_none() {
        return text.to_owned();
    }

    let skip = usize::try_from(line.unwrap_or(1).saturating_sub(1)).unwrap_or(usize::MAX);
    let take = limit
        .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);

    text.split_inclusive('\n').skip(skip).take(take).collect()
}
