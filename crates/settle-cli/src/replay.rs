//! Scripted replay on a virtual clock
//!
//! Feeds a script through the engine, letting timers fire at their exact
//! deadlines, then drains what is still pending and shuts the engine down.
//! Emitted records travel through the export channel to the configured
//! exporters.

use crate::script::{HostAction, ScriptLine};
use async_trait::async_trait;
use settle_core::config::{EngineSettings, ExportFormat, SettleConfig};
use settle_core::host::{EmitGate, ReadyFlag, RecordingDocument, StaticTimeline};
use settle_core::model::{Millis, TimingRecord};
use settle_correlate::{Collaborators, Engine, EngineStats, Transition};
use settle_export::{
    channel, run_export_loop, ApmTrace, BeaconExporter, ExportResult, ExportStats,
    JsonlExporter, JsonlExporterConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Replay options from the command line
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Write records here instead of stdout
    pub output: Option<PathBuf>,

    /// Overrides `[export] format`
    pub format: Option<ExportFormat>,

    /// Keep every transition in the summary
    pub journal: bool,

    /// Time origin reported by the scripted performance timeline
    pub time_origin: Millis,

    /// Export channel capacity
    pub buffer_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            output: None,
            format: None,
            journal: false,
            time_origin: 0.0,
            buffer_size: 1024,
        }
    }
}

/// What a replay did
#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub entries: u64,
    pub ended_at: Millis,
    pub stats: EngineStats,
    pub export: ExportStats,

    /// Records still held by a closed gate at shutdown
    pub stranded: usize,

    /// Empty unless `ReplayConfig::journal` is set
    pub transitions: Vec<Transition>,
}

/// Prints records to stdout, one JSON line each
struct StdoutExporter {
    format: ExportFormat,
}

#[async_trait]
impl BeaconExporter for StdoutExporter {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn export(&self, record: &TimingRecord) -> ExportResult<()> {
        let line = match self.format {
            ExportFormat::Beacon => serde_json::to_string(record)?,
            ExportFormat::Apm => match ApmTrace::from_record(record) {
                Some(trace) => serde_json::to_string(&trace)?,
                None => return Ok(()),
            },
        };
        println!("{}", line);
        Ok(())
    }
}

fn exporters(config: &SettleConfig, replay: &ReplayConfig) -> anyhow::Result<Vec<Arc<dyn BeaconExporter>>> {
    let format = replay.format.unwrap_or(config.export.format);

    let file_config = match &replay.output {
        Some(path) => Some(JsonlExporterConfig {
            path: path.clone(),
            append: false,
            flush_each: config.export.flush_each,
            format,
        }),
        None => JsonlExporterConfig::from_settings(&config.export).map(|mut c| {
            c.format = format;
            c
        }),
    };

    let exporter: Arc<dyn BeaconExporter> = match file_config {
        Some(file_config) => Arc::new(JsonlExporter::new(file_config)?),
        None => Arc::new(StdoutExporter { format }),
    };
    Ok(vec![exporter])
}

/// Latest point past the final script entry at which a pending timer can
/// still matter when the gate never opens again
fn drain_horizon(settings: &EngineSettings) -> Millis {
    let settle = settings
        .click_idle_timeout_ms
        .max(settings.navigation_idle_timeout_ms)
        .max(settings.uninteresting_mutation_timeout_ms);
    (settle + settings.emit_retry_ms) as Millis
}

/// Run `script` through a fresh engine built from `config`
pub async fn run_replay(
    config: &SettleConfig,
    replay: &ReplayConfig,
    script: Vec<ScriptLine>,
) -> anyhow::Result<ReplaySummary> {
    let (sink, rx) = channel(replay.buffer_size);
    let export_task = tokio::spawn(run_export_loop(rx, exporters(config, replay)?));

    let document = RecordingDocument::new();
    let timeline = StaticTimeline::new(replay.time_origin);
    let gate = ReadyFlag::new(true);
    let host = Collaborators::new(sink)
        .with_document(document.clone())
        .with_timeline(timeline.clone())
        .with_gate(gate.clone());
    let mut engine = Engine::new(&config.engine, &config.effective_exclusions(), host)?;

    let mut summary = ReplaySummary::default();
    let mut clock: Millis = 0.0;

    for line in script {
        clock = line.at;
        summary.entries += 1;

        if let Some(action) = line.host {
            engine.advance(clock);
            debug!("Host action at {}: {:?}", clock, action);
            match action {
                HostAction::Timeline { entry } => timeline.push(entry),
                HostAction::Gate { ready } => gate.set(ready),
                HostAction::RefuseListener { node } => document.refuse(node),
            }
        }

        let transitions = match line.input {
            Some(input) => engine.step(clock, input),
            None => engine.take_journal(),
        };
        if replay.journal {
            summary.transitions.extend(transitions);
        }

        // Give the export task a chance to keep up with the channel
        tokio::task::yield_now().await;
    }

    let horizon = clock + drain_horizon(&config.engine);
    while let Some(deadline) = engine.next_deadline() {
        if deadline > horizon && !gate.is_ready() {
            debug!("Gate still closed at {}, stopping drain", deadline);
            break;
        }
        clock = clock.max(deadline);
        engine.advance(clock);
        let transitions = engine.take_journal();
        if replay.journal {
            summary.transitions.extend(transitions);
        }
        tokio::task::yield_now().await;
    }

    summary.stranded = engine.shutdown(clock);
    if summary.stranded > 0 {
        warn!("{} records never passed the emit gate", summary.stranded);
    }
    let transitions = engine.take_journal();
    if replay.journal {
        summary.transitions.extend(transitions);
    }

    summary.ended_at = clock;
    summary.stats = engine.stats().clone();

    // Dropping the engine closes the channel and ends the export loop
    drop(engine);
    summary.export = export_task.await?;

    info!(
        "Replayed {} entries up to {}ms: {} records emitted",
        summary.entries, summary.ended_at, summary.stats.records_emitted
    );
    Ok(summary)
}
