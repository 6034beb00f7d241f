//! Offline replay of a recorded agent stream.
//!
//! A replay file carries the session identity plus the events and payloads an
//! agent produced. Replaying runs the regular stage machinery over an
//! [`InMemoryTransport`] seeded with that recording, then opens every finished
//! capture and prints its tree.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ProfilerConfig;
use crate::profilers::Profilers;
use crate::series::{CaptureDurationData, DataSeries, MemoryDataSeries, MemoryField};
use crate::session::{Device, Process, Session, SupportLevel};
use crate::stage::{back_to_main, Stage};
use crate::transport::{InMemoryTransport, RecordedStream};
use crate::tree::MemoryTree;
use crate::units::{ns_to_us, Range};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayFile {
    pub session: Session,
    pub device: Device,
    pub process: Process,
    #[serde(default)]
    pub support_level: SupportLevel,
    pub stream: RecordedStream,
}

impl ReplayFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse replay file {}", path.display()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub captures: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// Replays `file` and writes a report to `out`.
pub fn replay(file: ReplayFile, config: ProfilerConfig, out: &mut dyn Write) -> Result<ReplaySummary> {
    if file.stream.stream_id != file.session.stream_id {
        warn!(
            "Recorded stream {} does not match session stream {}",
            file.stream.stream_id, file.session.stream_id
        );
    }
    let transport = Arc::new(InMemoryTransport::from_recording(file.stream));
    let session = file.session;

    writeln!(
        out,
        "Session {} (pid {}, {}, API {})",
        session.session_id, session.pid, file.process.name, file.device.feature_level
    )?;
    for field in MemoryField::ALL {
        let series = MemoryDataSeries::new(transport.clone(), session.clone(), field);
        let data = series.data_for_range(&Range::EVERYTHING);
        if let Some(last) = data.last() {
            writeln!(
                out,
                "  {:<8} {} samples, last {} bytes at {}us",
                field.label(),
                data.len(),
                last.value,
                last.x
            )?;
        }
    }

    let mut profilers = Profilers::new(
        transport,
        session,
        file.device,
        file.process,
        config,
    )
    .with_support_level(file.support_level);
    profilers.start();
    profilers.settle();

    let captures: Vec<CaptureDurationData> = profilers
        .main_stage(|stage, _| {
            stage
                .captures()
                .iter()
                .map(|d| d.value.clone())
                .filter(|d| !d.is_open())
                .collect()
        })
        .unwrap_or_default();
    writeln!(out, "Captures: {}", captures.len())?;

    let mut summary = ReplaySummary {
        captures: captures.len(),
        ..ReplaySummary::default()
    };
    for duration in captures {
        let key = duration.entry.key().clone();
        writeln!(
            out,
            "- {:?} at {}us ({}us)",
            duration.kind(),
            ns_to_us(key.start_time_ns()),
            duration.duration_us
        )?;
        profilers.main_stage(|stage, p| stage.select_capture_duration(p, Some(duration)));
        profilers.settle();

        match rendered_tree(&mut profilers) {
            Some(lines) => {
                summary.loaded += 1;
                for line in lines {
                    writeln!(out, "    {line}")?;
                }
            }
            None => {
                summary.failed += 1;
                writeln!(out, "    (failed to load)")?;
            }
        }
        back_to_main(&mut profilers);
        profilers.settle();
    }

    profilers.stop();
    info!(
        "Replayed {} captures, {} loaded, {} failed",
        summary.captures, summary.loaded, summary.failed
    );
    Ok(summary)
}

/// The loaded tree of the active capture or allocation stage, one line per
/// top-level node.
fn rendered_tree(profilers: &mut Profilers) -> Option<Vec<String>> {
    profilers
        .with_stage(|stage, _| {
            let selection = match stage {
                Stage::Capture(capture) => capture.selection_mut(),
                Stage::Allocation(allocation) => allocation.selection_mut(),
                Stage::Main(_) => return None,
            };
            if !selection.is_loaded() {
                return None;
            }
            Some(match selection.tree_mut() {
                Some(tree) => render(tree),
                None => vec!["(no instances)".to_string()],
            })
        })
        .flatten()
}

fn render(tree: &mut MemoryTree) -> Vec<String> {
    let root = tree.root();
    let mut lines = vec![tree.node(root).label()];
    for child in tree.children(root) {
        let node = tree.node(child);
        match node.retained_size() {
            Some(size) => lines.push(format!("  {} (retained {})", node.label(), size)),
            None => lines.push(format!("  {}", node.label())),
        }
    }
    lines
}
