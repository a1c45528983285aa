use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam::channel::{unbounded, Receiver, Sender};
use tracing::{error, info};

use crate::extraction::error::{FailureKind, RunFailure};
use crate::extraction::orchestrator::{Orchestrator, RunOutcome};

/// Messages sent from the worker thread to the interactive thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(String),
    Finished(Result<RunOutcome, RunFailure>),
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub raw_path: PathBuf,
    pub title: String,
}

/// Interactive-side end of a running extraction.
pub struct RunHandle {
    rx: Receiver<RunEvent>,
    thread: Option<JoinHandle<()>>,
}

/// Start `request` on its own thread. Progress and the final result arrive
/// on the returned handle; the worker never touches caller state.
pub fn spawn_run(orchestrator: Arc<Orchestrator>, request: RunRequest) -> io::Result<RunHandle> {
    let (tx, rx) = unbounded::<RunEvent>();

    let thread = thread::Builder::new()
        .name("extraction-run".to_string())
        .spawn(move || run_on_worker(&orchestrator, &request, &tx))?;

    Ok(RunHandle { rx, thread: Some(thread) })
}

fn run_on_worker(orchestrator: &Orchestrator, request: &RunRequest, tx: &Sender<RunEvent>) {
    info!("Worker started for {:?}", request.raw_path);
    let progress = |msg: &str| {
        // The receiver may already be gone; progress is advisory.
        let _ = tx.send(RunEvent::Progress(msg.to_string()));
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        orchestrator.run(&request.raw_path, &request.title, &progress)
    }));

    let finished = match outcome {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(RunFailure::from(&e)),
        Err(_) => {
            error!("Extraction worker panicked for {:?}", request.raw_path);
            Err(RunFailure {
                kind: FailureKind::ExtractionFailed,
                message: "extraction worker panicked".to_string(),
            })
        }
    };

    if tx.send(RunEvent::Finished(finished)).is_err() {
        info!("Run for {:?} finished after its receiver went away", request.raw_path);
    }
}

impl RunHandle {
    /// Non-blocking: everything the worker has sent so far.
    pub fn drain(&self) -> Vec<RunEvent> {
        self.rx.try_iter().collect()
    }

    /// Block until the run finishes, discarding progress.
    #[cfg(test)]
    pub fn wait(mut self) -> Result<RunOutcome, RunFailure> {
        let mut finished = None;
        for event in self.rx.iter() {
            if let RunEvent::Finished(result) = event {
                finished = Some(result);
                break;
            }
        }
        self.join();
        finished.unwrap_or_else(|| Err(disconnected()))
    }

    /// `true` once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Extraction worker thread terminated abnormally");
            }
        }
    }
}

pub(crate) fn disconnected() -> RunFailure {
    RunFailure {
        kind: FailureKind::ExtractionFailed,
        message: "extraction worker exited without a result".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::extraction::orchestrator::tests::{fingerprint, orchestrator, FakeExtractor};
    use crate::media::preprocess::{ImagePreprocessor, PreprocessConfig};
    use crate::ml::minutia::MinutiaPoint;

    fn quick_enhancer() -> Arc<ImagePreprocessor> {
        Arc::new(ImagePreprocessor::new(PreprocessConfig {
            target_long_side: 0,
            clip_limit: 2.0,
            tile_grid: 2,
            denoise_strength: 0.0,
            sharpen_amount: 0.0,
        }))
    }

    #[test]
    fn test_run_reports_progress_then_result() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = fingerprint(dir.path())?;
        let extractor = Arc::new(FakeExtractor::with_points(vec![MinutiaPoint::at(3.0, 4.0)]));
        let orch = Arc::new(orchestrator(&dir.path().join("data"), quick_enhancer(), extractor));

        let handle = spawn_run(orch, RunRequest { raw_path: raw, title: "thread".into() })?;

        let mut events = Vec::new();
        while !matches!(events.last(), Some(RunEvent::Finished(_))) {
            events.extend(handle.drain());
            thread::sleep(Duration::from_millis(5));
        }

        assert!(events.len() > 2);
        assert!(matches!(events[0], RunEvent::Progress(_)));
        match events.last() {
            Some(RunEvent::Finished(Ok(outcome))) => {
                assert_eq!(outcome.count, 1);
                assert!(outcome.result_path.is_file());
            }
            other => panic!("unexpected final event {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_wait_returns_structured_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let raw = fingerprint(dir.path())?;
        let extractor = Arc::new(FakeExtractor { models_present: false, ..FakeExtractor::with_points(vec![]) });
        let orch = Arc::new(orchestrator(&dir.path().join("data"), quick_enhancer(), extractor));

        let handle = spawn_run(orch, RunRequest { raw_path: raw, title: "x".into() })?;
        let failure = handle.wait().unwrap_err();
        assert_eq!(failure.kind, FailureKind::ModelMissing);
        assert!(!failure.message.is_empty());
        Ok(())
    }
}
