use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;

use crate::api::ApiClient;
use crate::model::{Scrobble, Track};
use crate::store::{DayFile, Store, day_of};

/// Pause before re-requesting a page after a transient API failure.
const RETRY_DELAY: Duration = Duration::from_secs(2);
/// Courtesy pause between consecutive pages.
const PAGE_DELAY: Duration = Duration::from_millis(150);

/// Complete resumable state of a run, carried from one page to the next.
/// An interrupted run can be resumed by passing these back in on the
/// command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub page: u64,
    /// Timestamp of the last record seen by the previous page; names the
    /// day file to reopen before fetching.
    pub timestamp: Option<i64>,
    /// The user had a track in progress at some point during the run.
    pub is_currently_scrobbling: bool,
    /// Final pass: the history is archived, fetch page 1 once more to pick
    /// up the track that was still playing when the run started.
    pub collect_now_playing: bool,
}

impl RunState {
    pub fn initial() -> Self {
        Self {
            page: 1,
            timestamp: None,
            is_currently_scrobbling: false,
            collect_now_playing: false,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::initial()
    }
}

/// What to do after one page.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue(RunState),
    /// Transient upstream failure; re-request the identical page after a
    /// fixed pause.
    Retry,
    Done,
}

/// Walks the paginated history newest-first and feeds each record into the
/// per-day store. Owns the single open day file; a new day cannot be opened
/// until the previous one is finalized.
pub struct Driver {
    api: ApiClient,
    store: Store,
    current: Option<DayFile>,
}

impl Driver {
    pub fn new(api: ApiClient, store: Store) -> Self {
        Self {
            api,
            store,
            current: None,
        }
    }

    /// Runs the whole archive to completion: verifies the profile once,
    /// then loops over pages until the driver signals `Done`.
    pub fn run(&mut self, mut state: RunState) -> Result<()> {
        self.api.verify_user()?;
        tracing::info!(user = self.api.user(), "archiving scrobbles");

        loop {
            match self.run_page(&state)? {
                StepOutcome::Continue(next) => {
                    state = next;
                    thread::sleep(PAGE_DELAY);
                }
                StepOutcome::Retry => {
                    tracing::warn!(page = state.page, "transient API failure, retrying");
                    thread::sleep(RETRY_DELAY);
                }
                StepOutcome::Done => {
                    tracing::info!("archive complete");
                    return Ok(());
                }
            }
        }
    }

    /// One fetch cycle: reopen the resume day if needed, fetch the page,
    /// process it.
    pub fn run_page(&mut self, state: &RunState) -> Result<StepOutcome> {
        self.prepare(state)?;

        let Some(page) = self.api.recent_tracks(state.page) else {
            return Ok(StepOutcome::Retry);
        };

        self.process_page(&page.track, state)
    }

    /// Reopens the day file named by the carried timestamp, so the store is
    /// ready even when the first record of this page belongs to the same
    /// day as the previous page's last one.
    fn prepare(&mut self, state: &RunState) -> Result<()> {
        if self.current.is_none()
            && let Some(timestamp) = state.timestamp
        {
            self.current = Some(self.store.open_or_resume(day_of(timestamp))?);
        }
        Ok(())
    }

    /// Processes one page of records, newest first, and decides how the run
    /// continues.
    pub fn process_page(&mut self, tracks: &[Track], state: &RunState) -> Result<StepOutcome> {
        let mut scrobbling = state.is_currently_scrobbling;

        // reached the end of all pages
        if tracks.is_empty() {
            self.finish_current()?;
            if scrobbling {
                // the in-progress track never shows up in the history pages;
                // one more pass over page 1 picks it up now that it finished
                return Ok(StepOutcome::Continue(RunState {
                    page: 1,
                    timestamp: None,
                    is_currently_scrobbling: false,
                    collect_now_playing: true,
                }));
            }
            return Ok(StepOutcome::Done);
        }

        let mut last_seen = state.timestamp;
        let mut added = 0usize;
        let mut duplicates = 0usize;

        for track in tracks {
            if track.is_now_playing() {
                scrobbling = true;
                continue;
            }

            let Some(record) = Scrobble::from_track(track) else {
                tracing::debug!(title = %track.name, "track without a date, skipping");
                continue;
            };
            last_seen = Some(record.timestamp);

            let day = self.ensure_open(record.timestamp)?;
            if day.is_duplicate(record.timestamp) {
                duplicates += 1;
                continue;
            }
            day.append(&record)?;
            added += 1;
        }

        tracing::info!(page = state.page, added, duplicates, "page processed");

        // everything on this page was already archived, or this was the
        // dedicated now-playing pass: nothing further will advance
        if state.collect_now_playing || (added == 0 && duplicates > 0) {
            self.finish_current()?;
            return Ok(StepOutcome::Done);
        }

        Ok(StepOutcome::Continue(RunState {
            page: state.page + 1,
            timestamp: last_seen,
            is_currently_scrobbling: scrobbling,
            collect_now_playing: false,
        }))
    }

    /// Hands out the open day file for this timestamp's date, finalizing
    /// the previously open one first when the date changes.
    fn ensure_open(&mut self, timestamp: i64) -> Result<&mut DayFile> {
        let date = day_of(timestamp);
        let same_day = self.current.as_ref().is_some_and(|day| day.date() == date);
        if !same_day {
            self.finish_current()?;
            self.current = Some(self.store.open_or_resume(date)?);
        }
        self.current.as_mut().context("no day file open")
    }

    fn finish_current(&mut self) -> Result<()> {
        if let Some(day) = self.current.take() {
            day.finalize()?;
        }
        Ok(())
    }
}
