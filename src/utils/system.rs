// src/utils/system.rs: System functions

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::sleep;
use anyhow::Result;

use crate::config::defs::{PipelineError, StrainMap};


/// Determines number of cores that can be used for CPU based tasks
///
/// # Arguments
///
/// * `args_threads` - Upper bound requested on the command line.
///
/// # Returns
///
/// Result<(usize, f32)> usable cores, current cpu usage
pub async fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    let max_cores = physical_cores.min(args_threads).max(1);
    Ok((max_cores, cpu_load))
}


/// Runs `f` for every strain with at most `limit` invocations in flight.
///
/// Each invocation only touches its own strain's files, so results are simply
/// collected back into a map. The first error aborts the remaining work.
///
/// # Arguments
///
/// * `items` - (strain, input) pairs.
/// * `limit` - Maximum concurrent invocations.
/// * `f` - Per strain work.
///
/// # Returns
/// strain -> output
pub async fn fan_out<K, T, I, F, Fut>(items: I, limit: usize, f: F) -> Result<StrainMap<T>, PipelineError>
where
    I: IntoIterator<Item = (String, K)>,
    F: Fn(String, K) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let results: Vec<(String, T)> = stream::iter(items.into_iter().map(|(name, item)| {
        let work = f(name.clone(), item);
        async move { work.await.map(|value| (name, value)) }
    }))
        .buffer_unordered(limit.max(1))
        .try_collect()
        .await?;
    Ok(results.into_iter().collect())
}
