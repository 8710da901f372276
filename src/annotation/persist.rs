//! Versioned saving of annotation state.
//!
//! A save writes one bundle of JSON files under fresh sequential names
//! (`global2tracklet.json`, then `global2tracklet-1.json`, ...), so earlier
//! bundles are never overwritten. Every file of a bundle is staged in a temp
//! file first and only renamed into place once all of them are written.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::AnnotationState;
use crate::error::PersistError;
use crate::tracklet::TrackletSet;

const GLOBAL2TRACKLET: &str = "global2tracklet";
const TRACKLETS: &str = "tracklets";
const SPLIT_NAMES: &str = "split_names";
const SPLIT_TIMES: &str = "split_times";
const BUNDLE: [&str; 4] = [GLOBAL2TRACKLET, TRACKLETS, SPLIT_NAMES, SPLIT_TIMES];

fn bundle_path(dir: &Path, stem: &str, index: usize) -> PathBuf {
    if index == 0 {
        dir.join(format!("{}.json", stem))
    } else {
        dir.join(format!("{}-{}.json", stem, index))
    }
}

/// First bundle index with no file of the bundle on disk.
fn next_index(dir: &Path) -> usize {
    let mut index = 0;
    while BUNDLE.iter().any(|stem| bundle_path(dir, stem, index).exists()) {
        index += 1;
    }
    index
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Files written by one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBundle {
    pub index: usize,
    pub paths: Vec<PathBuf>,
}

fn write_bundle(dir: &Path, state: &AnnotationState) -> Result<SavedBundle, PersistError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    write_bundle_at(dir, next_index(dir), state)
}

/// Stages every file, then moves them into place. If any move fails, the
/// files already moved are removed again so no partial bundle remains.
fn write_bundle_at(
    dir: &Path,
    index: usize,
    state: &AnnotationState,
) -> Result<SavedBundle, PersistError> {
    let payloads = [
        (GLOBAL2TRACKLET, serde_json::to_string_pretty(state.global2tracklet())),
        (TRACKLETS, serde_json::to_string_pretty(state.tracklets())),
        (SPLIT_NAMES, serde_json::to_string_pretty(state.split_names())),
        (SPLIT_TIMES, serde_json::to_string_pretty(state.split_times())),
    ];

    let mut staged = Vec::with_capacity(payloads.len());
    for (stem, text) in payloads {
        let path = bundle_path(dir, stem, index);
        let text = text.map_err(|source| PersistError::Json {
            path: path.clone(),
            source,
        })?;
        let mut file = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
        file.write_all(text.as_bytes()).map_err(io_error(&path))?;
        file.as_file().sync_all().map_err(io_error(&path))?;
        staged.push((file, path));
    }

    let mut paths: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (file, path) in staged {
        if let Err(err) = file.persist_noclobber(&path) {
            for written in &paths {
                if let Err(cleanup) = fs::remove_file(written) {
                    warn!(path = %written.display(), error = %cleanup, "could not remove partial bundle file");
                }
            }
            warn!(index, path = %path.display(), "save rolled back");
            return Err(PersistError::Io {
                path,
                source: err.error,
            });
        }
        paths.push(path);
    }
    Ok(SavedBundle { index, paths })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&text).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Clears the in-progress flag when the save ends, even on panic.
struct SavingGuard(Arc<AtomicBool>);

impl Drop for SavingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A save running on its own thread.
pub struct SaveHandle(JoinHandle<Result<SavedBundle, PersistError>>);

impl SaveHandle {
    pub fn wait(self) -> Result<SavedBundle, PersistError> {
        self.0.join().map_err(|_| PersistError::SaveThreadPanicked)?
    }
}

/*-----------------------------------------------------------------------------
TrackletAnnotator
-----------------------------------------------------------------------------*/

/// Annotation state shared between editors and the saver.
///
/// Edits and saves take the same lock, so a save always sees a state
/// between two edits. Only one save may run at a time; another one is
/// refused with [`PersistError::SaveInProgress`] rather than queued.
#[derive(Debug, Clone)]
pub struct TrackletAnnotator {
    state: Arc<Mutex<AnnotationState>>,
    saving: Arc<AtomicBool>,
    output_dir: PathBuf,
}

impl TrackletAnnotator {
    pub fn new(state: AnnotationState, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            saving: Arc::new(AtomicBool::new(false)),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Runs `f` with exclusive access to the state.
    pub fn edit<R>(&self, f: impl FnOnce(&mut AnnotationState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn snapshot(&self) -> AnnotationState {
        self.state.lock().clone()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    fn begin_save(&self) -> Result<SavingGuard, PersistError> {
        if self.saving.swap(true, Ordering::AcqRel) {
            warn!("save requested while another save is running");
            return Err(PersistError::SaveInProgress);
        }
        Ok(SavingGuard(Arc::clone(&self.saving)))
    }

    /// Writes the state as a new bundle and returns its files.
    pub fn save(&self) -> Result<SavedBundle, PersistError> {
        let _guard = self.begin_save()?;
        let state = self.state.lock();
        let bundle = write_bundle(&self.output_dir, &state)?;
        info!(index = bundle.index, dir = %self.output_dir.display(), "saved annotation");
        Ok(bundle)
    }

    /// Like [`save`](Self::save), on a new thread. The in-progress check
    /// happens before this returns.
    pub fn save_in_background(&self) -> Result<SaveHandle, PersistError> {
        let guard = self.begin_save()?;
        let state = Arc::clone(&self.state);
        let dir = self.output_dir.clone();
        let handle = thread::spawn(move || -> Result<SavedBundle, PersistError> {
            let _guard = guard;
            let state = state.lock();
            let bundle = write_bundle(&dir, &state)?;
            info!(index = bundle.index, dir = %dir.display(), "saved annotation in background");
            Ok(bundle)
        });
        Ok(SaveHandle(handle))
    }

    /// Restores the newest complete bundle under `dir`. Later saves go to
    /// the same directory.
    pub fn load_latest(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        let index = (0..next_index(&dir))
            .rev()
            .find(|&i| BUNDLE.iter().all(|stem| bundle_path(&dir, stem, i).exists()))
            .ok_or_else(|| PersistError::NothingSaved(dir.clone()))?;

        let tracklets: TrackletSet = read_json(&bundle_path(&dir, TRACKLETS, index))?;
        let global2tracklet: BTreeMap<String, Vec<String>> =
            read_json(&bundle_path(&dir, GLOBAL2TRACKLET, index))?;
        let split_names = read_json(&bundle_path(&dir, SPLIT_NAMES, index))?;
        let split_times = read_json(&bundle_path(&dir, SPLIT_TIMES, index))?;

        let mut state = AnnotationState::with_identities(tracklets, global2tracklet)?;
        state.split_names = split_names;
        state.split_times = split_times;
        info!(index, dir = %dir.display(), "loaded annotation");
        Ok(Self::new(state, dir))
    }
}
