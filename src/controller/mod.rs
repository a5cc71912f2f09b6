//! Heartbeat & commit controller: a single-threaded cooperative loop per
//! tracked document that decides when to flush buffered activity to the WAL
//! and trigger a checkpoint commit, with debounce and a cooperative stop.

use crate::core::codec::put_u64;
use crate::core::errors::WitnessResult;
use crate::wal::{EntryType, Wal};
use std::time::{Duration, Instant};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_secs(10);
const MAX_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Heartbeat,
    UserSave,
    FileClose,
    AppSwitch,
    SessionEnd,
    WalThreshold,
    WalOverflow,
    CrashRecovery,
}

impl Trigger {
    /// `WalOverflow` always takes priority when promoting a trigger reason.
    fn priority(self) -> u8 {
        match self {
            Trigger::WalOverflow => 0,
            Trigger::CrashRecovery => 1,
            Trigger::WalThreshold => 2,
            Trigger::SessionEnd => 3,
            Trigger::FileClose => 4,
            Trigger::UserSave => 5,
            Trigger::AppSwitch => 6,
            Trigger::Heartbeat => 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub interval: Duration,
    pub wal_soft_limit: u64,
    pub wal_hard_limit: u64,
    pub commit_debounce: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            wal_soft_limit: 10 * 1024 * 1024,
            wal_hard_limit: 50 * 1024 * 1024,
            commit_debounce: Duration::from_millis(500),
        }
    }
}

impl ControllerConfig {
    pub fn clamped_interval(&self) -> Duration {
        self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
    }
}

/// Collaborator the controller asks to flush buffered activity before a
/// commit runs; returns the counters accumulated since the last flush.
pub trait Tracker {
    fn flush(&mut self) -> WitnessResult<FlushSummary>;
    fn wal_size_bytes(&self) -> u64;
}

#[derive(Debug, Clone, Default)]
pub struct FlushSummary {
    pub keystrokes_since_commit: u64,
    pub samples_since_commit: u64,
}

pub struct Controller<T: Tracker> {
    config: ControllerConfig,
    tracker: T,
    wal: Wal,
    last_commit: Option<Instant>,
    paused: bool,
    stopping: bool,
}

impl<T: Tracker> Controller<T> {
    pub fn new(config: ControllerConfig, tracker: T, wal: Wal) -> Self {
        Self {
            config,
            tracker,
            wal,
            last_commit: None,
            paused: false,
            stopping: false,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Cooperative stop: the next call to `on_trigger` after this performs a
    /// final drain (regardless of pause/debounce state) and returns.
    pub fn request_stop(&mut self) {
        self.stopping = true;
    }

    /// Presents a trigger to the controller. Timer ticks while paused are
    /// ignored unless the caller is forcing a final drain; external triggers
    /// (anything other than `Heartbeat`) still commit while paused.
    ///
    /// Returns `Some(promoted_trigger)` with the actual trigger reason used
    /// for the commit (after debounce and threshold promotion), or `None` if
    /// the trigger was dropped.
    pub fn on_trigger(
        &mut self,
        trigger: Trigger,
        now: Instant,
        mut on_commit: impl FnMut(Trigger) -> WitnessResult<()>,
        mut on_error: impl FnMut(&crate::core::errors::WitnessError),
    ) -> WitnessResult<Option<Trigger>> {
        let forced_drain = self.stopping || trigger == Trigger::SessionEnd;

        if self.paused && trigger == Trigger::Heartbeat && !forced_drain {
            return Ok(None);
        }

        if let Some(last) = self.last_commit {
            if !forced_drain && now.duration_since(last) < self.config.commit_debounce {
                return Ok(None);
            }
        }

        let flush = self.tracker.flush()?;
        let mut heartbeat_payload = Vec::with_capacity(16);
        put_u64(&mut heartbeat_payload, flush.keystrokes_since_commit);
        put_u64(&mut heartbeat_payload, flush.samples_since_commit);
        self.wal.append(EntryType::Heartbeat, heartbeat_payload)?;

        let wal_size = self.tracker.wal_size_bytes();
        let promoted = self.promote_trigger(trigger, wal_size);

        match on_commit(promoted) {
            Ok(()) => {
                self.last_commit = Some(now);
                Ok(Some(promoted))
            }
            Err(err) => {
                on_error(&err);
                Err(err)
            }
        }
    }

    fn promote_trigger(&self, trigger: Trigger, wal_size: u64) -> Trigger {
        let size_trigger = if wal_size >= self.config.wal_hard_limit {
            Some(Trigger::WalOverflow)
        } else if wal_size >= self.config.wal_soft_limit {
            Some(Trigger::WalThreshold)
        } else {
            None
        };

        match size_trigger {
            Some(candidate) if candidate.priority() < trigger.priority() => candidate,
            _ => trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::WitnessError;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockTracker {
        wal_size: u64,
        flush_count: Rc<RefCell<u32>>,
        flush_summary: FlushSummary,
    }

    impl Tracker for MockTracker {
        fn flush(&mut self) -> WitnessResult<FlushSummary> {
            *self.flush_count.borrow_mut() += 1;
            Ok(self.flush_summary.clone())
        }
        fn wal_size_bytes(&self) -> u64 {
            self.wal_size
        }
    }

    fn test_wal() -> (tempfile::TempDir, Wal) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.wal");
        let wal = Wal::open(&path, [4u8; 32], [5u8; 32]).unwrap();
        (dir, wal)
    }

    #[test]
    fn debounced_trigger_is_dropped() {
        let flush_count = Rc::new(RefCell::new(0));
        let tracker = MockTracker {
            wal_size: 0,
            flush_count: flush_count.clone(),
            flush_summary: FlushSummary::default(),
        };
        let (_wal_dir, wal) = test_wal();
        let mut controller = Controller::new(ControllerConfig::default(), tracker, wal);

        let now = Instant::now();
        let committed = Rc::new(RefCell::new(0));
        let committed2 = committed.clone();
        controller
            .on_trigger(
                Trigger::Heartbeat,
                now,
                |_| {
                    *committed2.borrow_mut() += 1;
                    Ok(())
                },
                |_| {},
            )
            .unwrap();

        let committed3 = committed.clone();
        let result = controller
            .on_trigger(
                Trigger::Heartbeat,
                now + Duration::from_millis(10),
                |_| {
                    *committed3.borrow_mut() += 1;
                    Ok(())
                },
                |_| {},
            )
            .unwrap();

        assert!(result.is_none());
        assert_eq!(*committed.borrow(), 1);
    }

    #[test]
    fn paused_heartbeat_is_ignored_but_user_save_commits() {
        let flush_count = Rc::new(RefCell::new(0));
        let tracker = MockTracker {
            wal_size: 0,
            flush_count: flush_count.clone(),
            flush_summary: FlushSummary::default(),
        };
        let (_wal_dir, wal) = test_wal();
        let mut controller = Controller::new(ControllerConfig::default(), tracker, wal);
        controller.pause();

        let now = Instant::now();
        let dropped = controller
            .on_trigger(Trigger::Heartbeat, now, |_| Ok(()), |_| {})
            .unwrap();
        assert!(dropped.is_none());

        let committed = controller
            .on_trigger(Trigger::UserSave, now, |_| Ok(()), |_| {})
            .unwrap();
        assert_eq!(committed, Some(Trigger::UserSave));
    }

    #[test]
    fn wal_overflow_promotes_over_heartbeat() {
        let flush_count = Rc::new(RefCell::new(0));
        let tracker = MockTracker {
            wal_size: 100 * 1024 * 1024,
            flush_count: flush_count.clone(),
            flush_summary: FlushSummary::default(),
        };
        let (_wal_dir, wal) = test_wal();
        let mut controller = Controller::new(ControllerConfig::default(), tracker, wal);

        let now = Instant::now();
        let promoted = controller
            .on_trigger(Trigger::Heartbeat, now, |_| Ok(()), |_| {})
            .unwrap();
        assert_eq!(promoted, Some(Trigger::WalOverflow));
    }

    #[test]
    fn commit_error_invokes_on_error_and_retains_counters() {
        let flush_count = Rc::new(RefCell::new(0));
        let tracker = MockTracker {
            wal_size: 0,
            flush_count: flush_count.clone(),
            flush_summary: FlushSummary::default(),
        };
        let (_wal_dir, wal) = test_wal();
        let mut controller = Controller::new(ControllerConfig::default(), tracker, wal);
        let now = Instant::now();

        let error_seen = Rc::new(RefCell::new(false));
        let error_seen2 = error_seen.clone();
        let result = controller.on_trigger(
            Trigger::UserSave,
            now,
            |_| Err(WitnessError::VdfInvalid),
            |_| *error_seen2.borrow_mut() = true,
        );

        assert!(result.is_err());
        assert!(*error_seen.borrow());
        assert!(controller.last_commit.is_none());
    }

    #[test]
    fn stop_forces_drain_even_while_debounced() {
        let flush_count = Rc::new(RefCell::new(0));
        let tracker = MockTracker {
            wal_size: 0,
            flush_count: flush_count.clone(),
            flush_summary: FlushSummary::default(),
        };
        let (_wal_dir, wal) = test_wal();
        let mut controller = Controller::new(ControllerConfig::default(), tracker, wal);
        let now = Instant::now();

        controller
            .on_trigger(Trigger::Heartbeat, now, |_| Ok(()), |_| {})
            .unwrap();
        controller.request_stop();

        let result = controller
            .on_trigger(Trigger::SessionEnd, now, |_| Ok(()), |_| {})
            .unwrap();
        assert_eq!(result, Some(Trigger::SessionEnd));
    }

    #[test]
    fn on_trigger_appends_heartbeat_entry_with_flush_counters() {
        let flush_count = Rc::new(RefCell::new(0));
        let tracker = MockTracker {
            wal_size: 0,
            flush_count: flush_count.clone(),
            flush_summary: FlushSummary {
                keystrokes_since_commit: 42,
                samples_since_commit: 7,
            },
        };
        let (_wal_dir, wal) = test_wal();
        let mut controller = Controller::new(ControllerConfig::default(), tracker, wal);

        controller
            .on_trigger(Trigger::UserSave, Instant::now(), |_| Ok(()), |_| {})
            .unwrap();

        let entries = controller.wal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, crate::wal::EntryType::Heartbeat);
        let mut offset = 0usize;
        let keystrokes = crate::core::codec::get_u64(&entries[0].payload, &mut offset).unwrap();
        let samples = crate::core::codec::get_u64(&entries[0].payload, &mut offset).unwrap();
        assert_eq!(keystrokes, 42);
        assert_eq!(samples, 7);
    }
}
