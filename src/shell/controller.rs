use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

use crate::archive::artifacts::remove_artifact;
use crate::database::repo::{CaseRecord, CaseRepository, NewCase};
use crate::extraction::error::{PipelineError, RunFailure};
use crate::extraction::orchestrator::{Orchestrator, RunOutcome};
use crate::extraction::worker::{disconnected, spawn_run, RunEvent, RunHandle, RunRequest};
use crate::shell::error::{Result, ShellError};

/// What the user filled in before pressing "extract".
#[derive(Debug, Clone)]
pub struct CaseForm {
    pub title: String,
    pub report_number: Option<String>,
    pub incident_date: Option<String>,
    pub image_path: PathBuf,
    pub owner_id: i64,
}

/// Everything the interactive layer needs to react to, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellEvent {
    Progress(String),
    Saved { record: CaseRecord, enhanced: bool },
    Failed(RunFailure),
    /// The form went away while the run was in flight.
    Discarded,
}

struct InFlight {
    handle: RunHandle,
    form: Weak<CaseForm>,
}

/// Owns at most one running extraction and turns its outcome into a stored
/// case. Every method is called from the interactive thread.
pub struct ExtractionController {
    orchestrator: Arc<Orchestrator>,
    cases: CaseRepository,
    in_flight: Option<InFlight>,
}

impl ExtractionController {
    pub fn new(orchestrator: Arc<Orchestrator>, cases: CaseRepository) -> Self {
        Self { orchestrator, cases, in_flight: None }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn start(&mut self, form: &Arc<CaseForm>) -> Result<()> {
        if self.in_flight.is_some() {
            return Err(ShellError::RunInFlight);
        }
        if form.title.trim().is_empty() {
            return Err(ShellError::Validation("Case title must not be empty".to_string()));
        }
        if form.image_path.as_os_str().is_empty() {
            return Err(ShellError::Validation("Choose a fingerprint image first".to_string()));
        }

        let request = RunRequest {
            raw_path: form.image_path.clone(),
            title: form.title.clone(),
        };
        let handle = spawn_run(self.orchestrator.clone(), request)?;
        info!("Started extraction for '{}'", form.title);
        self.in_flight = Some(InFlight { handle, form: Arc::downgrade(form) });
        Ok(())
    }

    /// Drain worker messages. Call from the interactive thread's idle loop.
    pub fn poll(&mut self) -> Vec<ShellEvent> {
        let Some(in_flight) = self.in_flight.as_ref() else {
            return Vec::new();
        };

        let exited = in_flight.handle.is_finished();
        let mut events = Vec::new();
        let mut finished = None;
        for event in in_flight.handle.drain() {
            match event {
                RunEvent::Progress(msg) => events.push(ShellEvent::Progress(msg)),
                RunEvent::Finished(result) => finished = Some(result),
            }
        }
        if finished.is_none() && exited {
            finished = Some(Err(disconnected()));
        }

        if let Some(result) = finished {
            if let Some(mut done) = self.in_flight.take() {
                done.handle.join();
                events.push(self.complete(&done.form, result));
            }
        }
        events
    }

    fn complete(&self, form: &Weak<CaseForm>, result: std::result::Result<RunOutcome, RunFailure>) -> ShellEvent {
        let Some(form) = form.upgrade() else {
            if let Ok(outcome) = &result {
                remove_artifact(&outcome.raw_path);
                remove_artifact(&outcome.result_path);
            }
            warn!("Form closed before extraction finished; result discarded");
            return ShellEvent::Discarded;
        };

        match result {
            Ok(outcome) => self.persist(&form, &outcome),
            Err(failure) => ShellEvent::Failed(failure),
        }
    }

    fn persist(&self, form: &CaseForm, outcome: &RunOutcome) -> ShellEvent {
        let case = NewCase {
            title: form.title.clone(),
            report_number: form.report_number.clone(),
            incident_date: form.incident_date.clone(),
            raw_path: outcome.raw_path.clone(),
            result_path: outcome.result_path.clone(),
            owner_id: form.owner_id,
            minutiae_count: outcome.count,
        };

        let id = match self.cases.create(&case) {
            Ok(id) => id,
            Err(e) => {
                let err = PipelineError::PersistenceFailed {
                    message: e.to_string(),
                    raw: outcome.raw_path.display().to_string(),
                    result: outcome.result_path.display().to_string(),
                };
                error!("{}", err);
                return ShellEvent::Failed(RunFailure::from(&err));
            }
        };

        let (raw, result) = self.cases.relocate(id, &outcome.raw_path, &outcome.result_path);
        info!("Case {} stored with artifacts {:?} and {:?}", id, raw, result);

        match self.cases.get_by_id(id) {
            Ok(record) => ShellEvent::Saved { record, enhanced: outcome.enhanced },
            Err(e) => {
                let err = PipelineError::PersistenceFailed {
                    message: format!("case {} stored but could not be read back: {}", id, e),
                    raw: raw.display().to_string(),
                    result: result.display().to_string(),
                };
                error!("{}", err);
                ShellEvent::Failed(RunFailure::from(&err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use crate::database::migrate::initialize;
    use crate::database::users::{NewUser, UserRepository};
    use crate::extraction::error::FailureKind;
    use crate::extraction::orchestrator::tests::{fingerprint, orchestrator, FakeExtractor};
    use crate::media::preprocess::{EnhancedImage, ImageEnhancer};
    use crate::ml::minutia::MinutiaPoint;

    struct Identity;

    impl ImageEnhancer for Identity {
        fn enhance(&self, image: &image::DynamicImage) -> anyhow::Result<EnhancedImage> {
            Ok(EnhancedImage::passthrough(image))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        cases: CaseRepository,
        owner: i64,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("shell.db");
        initialize(&db)?;
        let owner = UserRepository::new(&db).register(&NewUser::new("penyidik", "pw"))?;
        let cases = CaseRepository::new(&db, &dir.path().join("data"));
        Ok(Fixture { dir, cases, owner })
    }

    fn controller(fx: &Fixture, extractor: FakeExtractor) -> ExtractionController {
        let orch = orchestrator(fx.cases.data_root(), Arc::new(Identity), Arc::new(extractor));
        ExtractionController::new(Arc::new(orch), fx.cases.clone())
    }

    fn form(fx: &Fixture, title: &str) -> anyhow::Result<Arc<CaseForm>> {
        Ok(Arc::new(CaseForm {
            title: title.to_string(),
            report_number: Some("LP/1".to_string()),
            incident_date: None,
            image_path: fingerprint(fx.dir.path())?,
            owner_id: fx.owner,
        }))
    }

    fn run_to_end(ctrl: &mut ExtractionController) -> Vec<ShellEvent> {
        let mut events = Vec::new();
        while ctrl.is_running() {
            events.extend(ctrl.poll());
            thread::sleep(Duration::from_millis(5));
        }
        events
    }

    #[test]
    fn test_successful_run_is_stored_and_relocated() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut ctrl = controller(&fx, FakeExtractor::with_points(vec![MinutiaPoint::at(1.0, 1.0); 4]));
        let form = form(&fx, "Kasus Bank")?;

        ctrl.start(&form)?;
        let events = run_to_end(&mut ctrl);

        assert!(events.iter().any(|e| matches!(e, ShellEvent::Progress(_))));
        let Some(ShellEvent::Saved { record, enhanced }) = events.last() else {
            panic!("expected a saved case, got {:?}", events.last());
        };
        assert!(*enhanced);
        assert_eq!(record.title, "Kasus Bank");
        assert_eq!(record.minutiae_count, Some(4));
        let root = fx.cases.data_root();
        assert_eq!(PathBuf::from(&record.raw_artifact_path), root.join("mentah").join(format!("{}_mentah.png", record.id)));
        assert_eq!(PathBuf::from(&record.result_artifact_path), root.join("ekstraksi").join(format!("{}_ekstraksi.png", record.id)));
        assert!(PathBuf::from(&record.result_artifact_path).is_file());
        Ok(())
    }

    #[test]
    fn test_validation_and_reentry() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut ctrl = controller(&fx, FakeExtractor::with_points(vec![]));

        let blank = form(&fx, "   ")?;
        assert!(matches!(ctrl.start(&blank), Err(ShellError::Validation(_))));

        let no_image = Arc::new(CaseForm { image_path: PathBuf::new(), ..(*form(&fx, "t")?).clone() });
        assert!(matches!(ctrl.start(&no_image), Err(ShellError::Validation(_))));

        let ok = form(&fx, "first")?;
        ctrl.start(&ok)?;
        assert!(matches!(ctrl.start(&ok), Err(ShellError::RunInFlight)));
        run_to_end(&mut ctrl);
        assert!(!ctrl.is_running());
        Ok(())
    }

    #[test]
    fn test_missing_models_store_nothing() -> anyhow::Result<()> {
        let fx = fixture()?;
        let extractor = FakeExtractor { models_present: false, ..FakeExtractor::with_points(vec![]) };
        let mut ctrl = controller(&fx, extractor);

        let form = form(&fx, "tanpa model")?;
        ctrl.start(&form)?;
        let events = run_to_end(&mut ctrl);

        assert!(matches!(events.last(), Some(ShellEvent::Failed(f)) if f.kind == FailureKind::ModelMissing));
        assert_eq!(fx.cases.count(None)?, 0);
        Ok(())
    }

    #[test]
    fn test_dropped_form_discards_result() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut ctrl = controller(&fx, FakeExtractor::with_points(vec![MinutiaPoint::at(2.0, 2.0)]));

        let form = form(&fx, "ditutup")?;
        ctrl.start(&form)?;
        drop(form);
        let events = run_to_end(&mut ctrl);

        assert_eq!(events.last(), Some(&ShellEvent::Discarded));
        assert_eq!(fx.cases.count(None)?, 0);
        let staged = fs::read_dir(fx.cases.data_root())?.count();
        assert_eq!(staged, 0);
        Ok(())
    }

    #[test]
    fn test_persistence_failure_keeps_staged_artifacts() -> anyhow::Result<()> {
        let fx = fixture()?;
        let mut ctrl = controller(&fx, FakeExtractor::with_points(vec![]));

        let orphaned = Arc::new(CaseForm { owner_id: fx.owner + 100, ..(*form(&fx, "yatim")?).clone() });
        ctrl.start(&orphaned)?;
        let events = run_to_end(&mut ctrl);

        let Some(ShellEvent::Failed(failure)) = events.last() else {
            panic!("expected failure, got {:?}", events.last());
        };
        assert_eq!(failure.kind, FailureKind::PersistenceFailed);
        assert_eq!(fx.cases.count(None)?, 0);
        let staged = fs::read_dir(fx.cases.data_root())?.count();
        assert_eq!(staged, 2);
        Ok(())
    }
}
