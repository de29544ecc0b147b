// src/utils/streams.rs
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::config::defs::PipelineError;


#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChildStream {
    Stdout,
    Stderr,
}


/// Collects the lines of a child's stdout or stderr.
///
/// # Arguments
///
/// * `child` - Spawned child with the requested stream piped.
/// * `stream` - Which stream to read.
///
/// # Returns
/// Vec of lines, without terminators.
pub async fn read_child_output_to_vec(child: &mut Child, stream: ChildStream) -> Result<Vec<String>> {
    match stream {
        ChildStream::Stdout => {
            let stdout = child.stdout.take().ok_or_else(|| anyhow!("Child stdout not piped"))?;
            read_lines(stdout).await
        }
        ChildStream::Stderr => {
            let stderr = child.stderr.take().ok_or_else(|| anyhow!("Child stderr not piped"))?;
            read_lines(stderr).await
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<String>> {
    let mut lines = LinesStream::new(BufReader::new(reader).lines());
    let mut out = Vec::new();
    while let Some(line) = lines.next().await {
        out.push(line?);
    }
    Ok(out)
}


/// Drains a child's stderr in the background so a chatty tool never blocks on a full pipe.
pub fn spawn_stderr_collector(child: &mut Child) -> Option<JoinHandle<Result<Vec<String>>>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(async move { read_lines(stderr).await }))
}


/// Streams a child's stdout straight into a file.
///
/// # Arguments
///
/// * `child` - Spawned child with stdout piped.
/// * `out_path` - Destination file; truncated if present.
///
/// # Returns
/// Bytes written.
pub async fn child_stdout_to_file(child: &mut Child, out_path: &Path) -> Result<u64> {
    let mut stdout = child.stdout.take().ok_or_else(|| anyhow!("Child stdout not piped"))?;
    let file = File::create(out_path)
        .await
        .map_err(|e| anyhow!("Failed to create {}: {}", out_path.display(), e))?;
    let mut writer = BufWriter::new(file);
    let written = tokio::io::copy(&mut stdout, &mut writer).await?;
    writer.flush().await?;
    Ok(written)
}


/// Spawns `tool` with its stdin fed from `upstream`'s stdout, i.e. `upstream | tool args`.
///
/// # Arguments
///
/// * `upstream` - Producer child with stdout piped.
/// * `tool` - Consumer executable.
/// * `args` - Consumer arguments.
///
/// # Returns
/// The consumer child and the copy task handle.
pub async fn pipe_child_to_cmd(
    upstream: &mut Child,
    tool: &str,
    args: &[String],
) -> Result<(Child, JoinHandle<Result<u64>>), PipelineError> {
    let mut upstream_out = upstream.stdout.take().ok_or_else(|| PipelineError::ToolExecution {
        tool: tool.to_string(),
        error: "upstream stdout not piped".to_string(),
    })?;

    debug!("Piping into {} {}", tool, args.join(" "));
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("Failed to spawn: {}. Is {} installed?", e, tool),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| PipelineError::ToolExecution {
        tool: tool.to_string(),
        error: "stdin not piped".to_string(),
    })?;

    let copy_task = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut upstream_out, &mut stdin).await?;
        stdin.shutdown().await?;
        Ok(copied)
    });

    Ok((child, copy_task))
}


/// Awaits a spawned task, flattening the join error and the task's own error.
pub async fn join_with_error_handling<T>(task: JoinHandle<Result<T>>) -> Result<T, PipelineError> {
    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::Other(e)),
        Err(e) => Err(PipelineError::Other(anyhow!("Task failed: {}", e))),
    }
}
