//! Progress reporting and display
//!
//! This module provides a trait-based abstraction for progress reporting,
//! allowing the run coordinator to remain decoupled from display concerns.

use std::sync::Arc;

/// Status of a single object being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Waiting for a concurrency slot
    Pending,
    /// Downloading from the object store
    Fetching,
    /// Waiting on the document-understanding service
    Extracting,
    /// Upserting into the warehouse
    Writing,
    /// Successfully completed
    Done,
    /// Failed with error
    Failed(String),
    /// Stopped at a stage boundary
    Cancelled,
}

impl EntryStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryStatus::Done | EntryStatus::Failed(_) | EntryStatus::Cancelled
        )
    }
}

/// Phase of the overall run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    /// Creating the destination table and loading processed paths
    Preparing,
    /// Listing the object store
    Listing,
    /// Running per-object pipelines
    Processing,
    /// Completed (possibly with per-object failures)
    Completed,
    /// Failed before any object was dispatched
    Failed(String),
}

/// Progress reporter trait - implement this for different display backends.
pub trait ProgressReporter: Send + Sync {
    /// Set the overall run phase.
    fn set_phase(&self, phase: RunPhase);

    /// Register entries to track (call before processing starts).
    fn register_entries(&self, entries: Vec<String>);

    /// Update the status of a specific entry.
    fn update_entry(&self, entry: &str, status: EntryStatus);

    /// Finish and clean up the display.
    fn finish(&self);
}

/// A no-op reporter for when progress display is disabled.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn set_phase(&self, _phase: RunPhase) {}
    fn register_entries(&self, _entries: Vec<String>) {}
    fn update_entry(&self, _entry: &str, _status: EntryStatus) {}
    fn finish(&self) {}
}

/// Statistics collected during processing.
#[derive(Debug, Default)]
struct Stats {
    total_entries: usize,
    successful_entries: usize,
    failed_entries: usize,
    cancelled_entries: usize,
    start_time: Option<std::time::Instant>,
}

impl Stats {
    fn started() -> Self {
        Self {
            start_time: Some(std::time::Instant::now()),
            ..Default::default()
        }
    }

    fn record(&mut self, status: &EntryStatus) {
        match status {
            EntryStatus::Done => self.successful_entries += 1,
            EntryStatus::Failed(_) => self.failed_entries += 1,
            EntryStatus::Cancelled => self.cancelled_entries += 1,
            _ => {}
        }
    }

    fn print_summary(&self) {
        let duration = self.start_time.map(|t| t.elapsed()).unwrap_or_default();

        eprintln!();
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("📊 Summary");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("   📄 Documents:  {} pending", self.total_entries);
        eprintln!("   ✅ Successful: {}", self.successful_entries);
        if self.failed_entries > 0 {
            eprintln!("   ❌ Failed:     {}", self.failed_entries);
        }
        if self.cancelled_entries > 0 {
            eprintln!("   ⏹️  Cancelled:  {}", self.cancelled_entries);
        }
        eprintln!("   ⏱️  Duration:   {:.2}s", duration.as_secs_f64());
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

/// A simple reporter that just prints to stderr (for non-TTY).
pub struct SimpleReporter {
    stats: std::sync::Mutex<Stats>,
}

impl SimpleReporter {
    pub fn new() -> Self {
        Self {
            stats: std::sync::Mutex::new(Stats::started()),
        }
    }
}

impl Default for SimpleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SimpleReporter {
    fn set_phase(&self, phase: RunPhase) {
        let (emoji, msg) = match phase {
            RunPhase::Preparing => ("🔧", "Preparing destination table..."),
            RunPhase::Listing => ("📋", "Listing objects..."),
            RunPhase::Processing => ("📄", "Processing documents..."),
            RunPhase::Completed => ("✅", "Completed!"),
            RunPhase::Failed(ref e) => {
                eprintln!("❌ Failed: {e}");
                return;
            }
        };
        eprintln!("{emoji} {msg}");
    }

    fn register_entries(&self, entries: Vec<String>) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_entries = entries.len();
        }
        eprintln!("   Found {} pending documents", entries.len());
    }

    fn update_entry(&self, entry: &str, status: EntryStatus) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record(&status);
        }
        match status {
            EntryStatus::Done => eprintln!("   ✓ {entry}"),
            EntryStatus::Failed(ref e) => eprintln!("   ✗ {entry}: {e}"),
            EntryStatus::Cancelled => eprintln!("   ⏹ {entry}: cancelled"),
            _ => {}
        }
    }

    fn finish(&self) {
        if let Ok(stats) = self.stats.lock() {
            stats.print_summary();
        }
    }
}

/// Fancy interactive reporter with progress bars (for TTY).
pub struct FancyReporter {
    multi: indicatif::MultiProgress,
    phase_bar: indicatif::ProgressBar,
    entries: std::sync::Mutex<std::collections::HashMap<String, Option<indicatif::ProgressBar>>>,
    main_progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    stats: std::sync::Mutex<Stats>,
}

impl FancyReporter {
    pub fn new() -> Self {
        let multi = indicatif::MultiProgress::new();
        let phase_bar = multi.add(indicatif::ProgressBar::new_spinner());
        phase_bar.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap(),
        );
        phase_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            phase_bar,
            entries: Default::default(),
            main_progress: Default::default(),
            stats: std::sync::Mutex::new(Stats::started()),
        }
    }

    fn status_emoji(status: &EntryStatus) -> &'static str {
        match status {
            EntryStatus::Pending => "⏳",
            EntryStatus::Fetching => "⬇️ ",
            EntryStatus::Extracting => "🔍",
            EntryStatus::Writing => "🗄️ ",
            EntryStatus::Done => "✅",
            EntryStatus::Failed(_) => "❌",
            EntryStatus::Cancelled => "⏹️ ",
        }
    }
}

impl Default for FancyReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for FancyReporter {
    fn set_phase(&self, phase: RunPhase) {
        let msg = match phase {
            RunPhase::Preparing => "🔧 Preparing destination table...",
            RunPhase::Listing => "📋 Listing objects...",
            RunPhase::Processing => "📄 Processing documents...",
            RunPhase::Completed => "✅ Completed!",
            RunPhase::Failed(ref e) => {
                self.phase_bar
                    .finish_with_message(format!("❌ Failed: {e}"));
                return;
            }
        };
        if matches!(phase, RunPhase::Completed) {
            self.phase_bar.finish_with_message(msg);
        } else {
            self.phase_bar.set_message(msg);
        }
    }

    fn register_entries(&self, entries: Vec<String>) {
        let total = entries.len();
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_entries = total;
        }

        let main_pb = self.multi.add(indicatif::ProgressBar::new(total as u64));
        main_pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("   {bar:40.cyan/blue} {pos}/{len} documents")
                .unwrap()
                .progress_chars("█▓▒░  "),
        );
        if let Ok(mut main_progress) = self.main_progress.lock() {
            *main_progress = Some(main_pb);
        }

        // Bars are created lazily once an entry leaves Pending.
        if let Ok(mut map) = self.entries.lock() {
            map.extend(entries.into_iter().map(|entry| (entry, None)));
        }
    }

    fn update_entry(&self, entry: &str, status: EntryStatus) {
        let Ok(mut map) = self.entries.lock() else {
            return;
        };

        if status.is_terminal() {
            if let Some(Some(pb)) = map.remove(entry) {
                pb.finish_and_clear();
            }
            if let Ok(main_progress) = self.main_progress.lock() {
                if let Some(main_pb) = main_progress.as_ref() {
                    main_pb.inc(1);
                }
            }
            if let EntryStatus::Failed(ref e) = status {
                self.multi.println(format!("❌ {entry}: {e}")).ok();
            }
            if let Ok(mut stats) = self.stats.lock() {
                stats.record(&status);
            }
            return;
        }

        if let Some(entry_slot) = map.get_mut(entry) {
            let message = format!("{} {entry}: {status:?}", Self::status_emoji(&status));
            if let Some(pb) = entry_slot {
                pb.set_message(message);
            } else {
                let pb = self.multi.add(indicatif::ProgressBar::new_spinner());
                pb.set_style(
                    indicatif::ProgressStyle::default_spinner()
                        .template("   {msg}")
                        .unwrap(),
                );
                pb.set_message(message);
                pb.enable_steady_tick(std::time::Duration::from_millis(100));
                *entry_slot = Some(pb);
            }
        }
    }

    fn finish(&self) {
        if let Ok(map) = self.entries.lock() {
            for pb in map.values().flatten() {
                pb.finish_and_clear();
            }
        }
        if let Ok(main_progress) = self.main_progress.lock() {
            if let Some(main_pb) = main_progress.as_ref() {
                main_pb.finish_and_clear();
            }
        }
        self.phase_bar.finish_and_clear();
        if let Ok(stats) = self.stats.lock() {
            stats.print_summary();
        }
    }
}

/// Create an appropriate reporter based on terminal capabilities.
pub fn create_reporter() -> Arc<dyn ProgressReporter> {
    if console::Term::stderr().is_term() {
        Arc::new(FancyReporter::new())
    } else {
        Arc::new(SimpleReporter::new())
    }
}

/// Collects every status change, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingReporter {
    pub events: std::sync::Mutex<Vec<(String, EntryStatus)>>,
    pub phases: std::sync::Mutex<Vec<RunPhase>>,
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter {
    fn set_phase(&self, phase: RunPhase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn register_entries(&self, entries: Vec<String>) {
        let mut events = self.events.lock().unwrap();
        events.extend(
            entries
                .into_iter()
                .map(|entry| (entry, EntryStatus::Pending)),
        );
    }

    fn update_entry(&self, entry: &str, status: EntryStatus) {
        self.events
            .lock()
            .unwrap()
            .push((entry.to_string(), status));
    }

    fn finish(&self) {}
}
