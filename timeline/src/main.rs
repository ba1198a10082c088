use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use timeline::TimelineSession;
use timeline::core::{EventId, PackOrder, RangePolicy, TimelineConfig};
use timeline::interaction::{Signal, SignalOutcome};
use timeline::projectors::render_projector::RenderedTimeline;
use timeline::storage::{EventSource, JsonEventSource};

/// Log spec override, e.g. `TIMELINE_LOG=timeline=debug`.
const LOG_ENV: &str = "TIMELINE_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "timeline",
    about = "Pack dated events into lanes and replay drag/rename edits",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(flatten)]
    settings: SettingsArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    /// JSON file with a full or partial timeline configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Day mapped to grid column 1 (YYYY-MM-DD).
    #[arg(long, global = true)]
    origin: Option<NaiveDate>,
    /// Pointer pixels per day while dragging.
    #[arg(long, global = true)]
    column_width: Option<f64>,
    /// Sort by start date before packing (minimum lanes, not input order).
    #[arg(long, global = true)]
    sort_by_start: bool,
    /// How to treat events whose start is after their end.
    #[arg(long, global = true, value_enum)]
    range_policy: Option<RangePolicyArg>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RangePolicyArg {
    Accept,
    Reject,
    Clamp,
}

impl From<RangePolicyArg> for RangePolicy {
    fn from(arg: RangePolicyArg) -> Self {
        match arg {
            RangePolicyArg::Accept => RangePolicy::Accept,
            RangePolicyArg::Reject => RangePolicy::Reject,
            RangePolicyArg::Clamp => RangePolicy::Clamp,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pack events into lanes and print their grid spans.
    Lanes(LanesArgs),

    /// Drag one event by a pointer distance and print the re-packed timeline.
    Drag(DragArgs),

    /// Rename one event and print the timeline.
    Rename(RenameArgs),

    /// Replay a JSON script of interaction signals.
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
struct LanesArgs {
    /// Seed file: JSON array of { id, name, start, end }.
    seed: PathBuf,
    /// Emit JSON instead of a human-readable listing.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DragArgs {
    seed: PathBuf,
    /// Id of the event to drag.
    #[arg(long)]
    event: i64,
    /// Horizontal pointer travel in pixels (negative drags left).
    #[arg(long, allow_negative_numbers = true)]
    delta_x: f64,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RenameArgs {
    seed: PathBuf,
    /// Id of the event to rename.
    #[arg(long)]
    event: i64,
    /// New display name.
    #[arg(long)]
    name: String,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    seed: PathBuf,
    /// JSON array of signals, e.g. [{"signal":"begin_drag","event_id":1,"pointer_x":0}].
    signals: PathBuf,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose);
    let config = resolve_config(&cli.settings)?;
    match cli.command {
        Commands::Lanes(args) => handle_lanes(args, config),
        Commands::Drag(args) => handle_drag(args, config),
        Commands::Rename(args) => handle_rename(args, config),
        Commands::Replay(args) => handle_replay(args, config),
    }
}

fn init_logging(verbose: bool) -> Option<LoggerHandle> {
    let default_spec = if verbose { "debug" } else { "warn" };
    let spec = std::env::var(LOG_ENV).unwrap_or_else(|_| default_spec.to_string());
    match Logger::try_with_str(&spec).and_then(|logger| logger.log_to_stderr().start()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("warning: logging disabled: {err}");
            None
        }
    }
}

fn resolve_config(settings: &SettingsArgs) -> Result<TimelineConfig> {
    let mut config = match &settings.config {
        Some(path) => {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
            serde_json::from_str::<TimelineConfig>(&text)
                .with_context(|| format!("decoding config {:?}", path))?
        }
        None => TimelineConfig::default(),
    };
    if let Some(origin) = settings.origin {
        config.origin = origin;
    }
    if let Some(width) = settings.column_width {
        config.column_width_px = width;
    }
    if settings.sort_by_start {
        config.pack_order = PackOrder::ByStart;
    }
    if let Some(policy) = settings.range_policy {
        config.range_policy = policy.into();
    }
    config.validate().context("validating timeline configuration")?;
    Ok(config)
}

fn load_session(seed: &Path, config: TimelineConfig) -> Result<TimelineSession> {
    let raw = JsonEventSource.load(seed)?;
    log::debug!("loaded {} seed records from {:?}", raw.len(), seed);
    TimelineSession::load(&raw, config).with_context(|| format!("parsing events in {:?}", seed))
}

fn handle_lanes(args: LanesArgs, config: TimelineConfig) -> Result<()> {
    let LanesArgs { seed, json } = args;
    let session = load_session(&seed, config)?;
    emit(&session.render(), json)
}

fn handle_drag(args: DragArgs, config: TimelineConfig) -> Result<()> {
    let DragArgs {
        seed,
        event,
        delta_x,
        json,
    } = args;
    let mut session = load_session(&seed, config)?;
    drag_event(&mut session, EventId(event), delta_x)
        .with_context(|| format!("dragging in {:?}", seed))?;
    emit(&session.render(), json)
}

/// Begin, move and end one drag. Fails when the event is unknown or the
/// move is refused.
fn drag_event(session: &mut TimelineSession, id: EventId, delta_x: f64) -> Result<()> {
    if session.apply(Signal::BeginDrag {
        event_id: id,
        pointer_x: 0.0,
    }) == SignalOutcome::Ignored
    {
        anyhow::bail!("no event with id {id}");
    }
    let moved = session.apply(Signal::MoveDrag { pointer_x: delta_x });
    session.apply(Signal::EndDrag);
    if moved == SignalOutcome::Ignored {
        anyhow::bail!("event {id} cannot be moved by {delta_x}px");
    }
    Ok(())
}

fn handle_rename(args: RenameArgs, config: TimelineConfig) -> Result<()> {
    let RenameArgs {
        seed,
        event,
        name,
        json,
    } = args;
    let mut session = load_session(&seed, config)?;
    let script = [
        Signal::BeginEdit {
            event_id: EventId(event),
        },
        Signal::ChangeDraftName { text: name },
        Signal::CommitEdit,
    ];
    if run_script(&mut session, script)? == SignalOutcome::Ignored {
        anyhow::bail!("no event with id {event} in {:?}", seed);
    }
    emit(&session.render(), json)
}

fn handle_replay(args: ReplayArgs, config: TimelineConfig) -> Result<()> {
    let ReplayArgs {
        seed,
        signals,
        json,
    } = args;
    let mut session = load_session(&seed, config)?;
    let script = load_signals(&signals)?;
    let mut ignored = 0usize;
    for (idx, signal) in script.into_iter().enumerate() {
        let outcome = session.apply(signal);
        log::debug!("signal #{idx}: {outcome:?}");
        if outcome == SignalOutcome::Ignored {
            ignored += 1;
        }
    }
    if ignored > 0 {
        eprintln!("{ignored} signal(s) had no effect");
    }
    emit(&session.render(), json)
}

/// Apply `script` in order. Returns `Ignored` as soon as the opening signal
/// is ignored (unknown event); otherwise the outcome of the last signal.
fn run_script(
    session: &mut TimelineSession,
    script: impl IntoIterator<Item = Signal>,
) -> Result<SignalOutcome> {
    let mut last = None;
    for signal in script {
        let outcome = session.apply(signal);
        if last.is_none() && outcome == SignalOutcome::Ignored {
            return Ok(outcome);
        }
        last = Some(outcome);
    }
    last.context("empty signal script")
}

fn load_signals(path: &Path) -> Result<Vec<Signal>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("decoding signals in {:?}", path))
}

fn emit(view: &RenderedTimeline, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
    } else {
        print!("{}", format_timeline(view));
    }
    Ok(())
}

fn format_timeline(view: &RenderedTimeline) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "origin {}  columns {}  cell {:.0}px",
        view.origin, view.grid_columns, view.cell_width_px
    );
    if view.lanes.is_empty() {
        let _ = writeln!(out, "(no events)");
        return out;
    }
    for lane in &view.lanes {
        let _ = writeln!(out, "Lane {}", lane.index + 1);
        for event in &lane.events {
            let _ = writeln!(
                out,
                "  [{:>4}, {:>4})  #{:<4} {}  {}..{}",
                event.grid.grid_start,
                event.grid.grid_end,
                event.id.0,
                event.label(),
                event.start_date,
                event.end_date
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SEED: &str = r#"[
        {"id": 1, "name": "Design", "start": "2021-01-01", "end": "2021-01-03"},
        {"id": 2, "name": "Build", "start": "2021-01-02", "end": "2021-01-05"},
        {"id": 3, "name": "Review", "start": "2021-01-04", "end": "2021-01-06"}
    ]"#;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write fixture");
        path
    }

    fn no_overrides() -> SettingsArgs {
        SettingsArgs {
            config: None,
            origin: None,
            column_width: None,
            sort_by_start: false,
            range_policy: None,
        }
    }

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = write(
            tmp.path(),
            "config.json",
            r#"{"origin":"2020-06-01","column_width_px":40}"#,
        );
        let settings = SettingsArgs {
            config: Some(config),
            column_width: Some(80.0),
            sort_by_start: true,
            range_policy: Some(RangePolicyArg::Accept),
            ..no_overrides()
        };

        let resolved = resolve_config(&settings).expect("resolve");
        assert_eq!(resolved.origin, NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        assert_eq!(resolved.column_width_px, 80.0);
        assert_eq!(resolved.pack_order, PackOrder::ByStart);
        assert_eq!(resolved.range_policy, RangePolicy::Accept);
    }

    #[test]
    fn negative_column_width_is_rejected() {
        let settings = SettingsArgs {
            column_width: Some(-5.0),
            ..no_overrides()
        };
        assert!(resolve_config(&settings).is_err());
    }

    #[test]
    fn lanes_listing_matches_packing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let seed = write(tmp.path(), "items.json", SEED);
        let session = load_session(&seed, TimelineConfig::default()).expect("load");

        let text = format_timeline(&session.render());
        let expected = "\
origin 2021-01-01  columns 100  cell 50px
Lane 1
  [   1,    4)  #1    Design  2021-01-01..2021-01-03
  [   4,    7)  #3    Review  2021-01-04..2021-01-06
Lane 2
  [   2,    6)  #2    Build  2021-01-02..2021-01-05
";
        assert_eq!(text, expected);
    }

    #[test]
    fn malformed_seed_names_the_record() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let seed = write(
            tmp.path(),
            "items.json",
            r#"[{"id": 5, "name": "Oops", "start": "2021-01-01", "end": "01/03/2021"}]"#,
        );
        let err = load_session(&seed, TimelineConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("event 5"));
    }

    #[test]
    fn run_script_reports_unknown_event() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let seed = write(tmp.path(), "items.json", SEED);
        let mut session = load_session(&seed, TimelineConfig::default()).expect("load");

        let outcome = run_script(
            &mut session,
            [
                Signal::BeginDrag {
                    event_id: EventId(42),
                    pointer_x: 0.0,
                },
                Signal::MoveDrag { pointer_x: 300.0 },
                Signal::EndDrag,
            ],
        )
        .expect("script");
        assert_eq!(outcome, SignalOutcome::Ignored);
    }

    #[test]
    fn drag_outside_the_calendar_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let seed = write(tmp.path(), "items.json", SEED);
        let mut session = load_session(&seed, TimelineConfig::default()).expect("load");

        let err = drag_event(&mut session, EventId(1), f64::INFINITY).unwrap_err();
        assert!(err.to_string().contains("event 1 cannot be moved"));
        let design = session.event(EventId(1)).expect("event 1");
        assert_eq!(design.start, "2021-01-01");
        assert!(!session.drag_state().is_dragging());

        assert!(drag_event(&mut session, EventId(42), 100.0).is_err());
        drag_event(&mut session, EventId(1), 250.0).expect("two-day drag");
        assert_eq!(session.event(EventId(1)).unwrap().start, "2021-01-03");
    }

    #[test]
    fn replayed_script_drags_and_renames() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let seed = write(tmp.path(), "items.json", SEED);
        let signals = write(
            tmp.path(),
            "signals.json",
            r#"[
                {"signal": "begin_drag", "event_id": 1, "pointer_x": 20},
                {"signal": "move_drag", "pointer_x": 95},
                {"signal": "move_drag", "pointer_x": 270},
                {"signal": "pointer_released"},
                {"signal": "begin_edit", "event_id": 1},
                {"signal": "change_draft_name", "text": "Design v2"},
                {"signal": "commit_edit"}
            ]"#,
        );
        let mut session = load_session(&seed, TimelineConfig::default()).expect("load");
        for signal in load_signals(&signals).expect("signals") {
            session.apply(signal);
        }

        let design = session.event(EventId(1)).expect("event 1");
        assert_eq!(design.name, "Design v2");
        assert_eq!(design.start, "2021-01-03");
        assert!(!session.drag_state().is_dragging());
    }

    #[test]
    fn bundled_demo_data_loads() {
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
        let mut session = load_session(
            &manifest.join("data/timeline_items.json"),
            TimelineConfig::default(),
        )
        .expect("demo seed");
        for signal in load_signals(&manifest.join("data/demo_signals.json")).expect("demo script")
        {
            session.apply(signal);
        }
        assert!(!session.render().lanes.is_empty());
    }
}
