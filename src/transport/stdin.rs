use crate::error::Result;
use crate::ingress::Ingress;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const CONTINUATION: char = '\\';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdinSummary {
    pub admitted: usize,
    pub rejected: usize,
}

/// Admits one event per line of standard input until EOF or shutdown.
pub async fn run(ingress: Arc<Ingress>, shutdown: CancellationToken) -> Result<StdinSummary> {
    run_reader(ingress, BufReader::new(tokio::io::stdin()), shutdown).await
}

/// Lines ending in `\` continue on the next line; blank events are skipped.
pub async fn run_reader<R>(
    ingress: Arc<Ingress>,
    reader: R,
    shutdown: CancellationToken,
) -> Result<StdinSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = StdinSummary::default();
    let mut pending = String::new();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        if let Some(continued) = line.strip_suffix(CONTINUATION) {
            pending.push_str(continued);
            pending.push('\n');
            continue;
        }
        pending.push_str(&line);
        let event = std::mem::take(&mut pending);
        admit_line(&ingress, event, &mut summary).await;
    }

    if !pending.is_empty() {
        admit_line(&ingress, pending, &mut summary).await;
    }
    tracing::info!(
        target: "eel::stdin",
        event = "stdin_closed",
        admitted = summary.admitted,
        rejected = summary.rejected
    );
    Ok(summary)
}

async fn admit_line(ingress: &Ingress, event: String, summary: &mut StdinSummary) {
    if event.trim().is_empty() {
        return;
    }
    match ingress.admit(Bytes::from(event), BTreeMap::new()).await {
        Ok(_) => summary.admitted += 1,
        Err(err) => {
            summary.rejected += 1;
            tracing::warn!(target: "eel::stdin", event = "stdin_rejected", error = %err);
        }
    }
}
