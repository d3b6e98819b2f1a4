/*!
 * Tests for submission admission
 */

use parking_lot::Mutex;
use std::sync::Arc;

use tubeslides::admission::{Admission, AdmissionController, JobLauncher, ACCEPTED_MESSAGE};
use tubeslides::app_config::AdmissionConfig;
use tubeslides::database::models::JobStatus;
use tubeslides::database::JobRepository;
use tubeslides::errors::PipelineError;

use crate::common::job_config;

/// Remembers launched job ids instead of running anything
#[derive(Default)]
struct RecordingLauncher {
    launched: Mutex<Vec<i64>>,
}

impl JobLauncher for RecordingLauncher {
    fn launch(&self, job_id: i64) {
        self.launched.lock().push(job_id);
    }
}

fn setup(ceiling: usize) -> (Arc<JobRepository>, Arc<RecordingLauncher>, AdmissionController) {
    let repo = Arc::new(JobRepository::new_in_memory().unwrap());
    let launcher = Arc::new(RecordingLauncher::default());
    let config = AdmissionConfig {
        max_concurrent_jobs: ceiling,
        allowed_hosts: vec!["youtube.com".to_string()],
    };
    let admission = AdmissionController::new(repo.clone(), launcher.clone(), &config);
    (repo, launcher, admission)
}

#[tokio::test]
async fn test_submit_atCeiling_shouldReportOverloadUntilAJobEnds() {
    let (repo, launcher, admission) = setup(2);

    let first = admission
        .submit("https://youtube.com/watch?v=1", job_config())
        .await
        .unwrap();
    let second = admission
        .submit("https://youtube.com/watch?v=2", job_config())
        .await
        .unwrap();
    assert!(matches!(first, Admission::Accepted(_)));
    assert!(matches!(second, Admission::Accepted(_)));

    let third = admission
        .submit("https://youtube.com/watch?v=3", job_config())
        .await
        .unwrap();
    assert_eq!(third, Admission::Overloaded { active: 2, ceiling: 2 });
    assert!(matches!(
        third.into_job(),
        Err(PipelineError::Overloaded { active: 2, ceiling: 2 })
    ));

    // One of the running jobs fails, freeing a slot
    let mut job = first.into_job().unwrap();
    job.status = JobStatus::Failed;
    job.error = Some("boom".to_string());
    repo.save_job(&job).await.unwrap();

    let retry = admission
        .submit("https://youtube.com/watch?v=3", job_config())
        .await
        .unwrap();
    assert!(matches!(retry, Admission::Accepted(_)));
    assert_eq!(launcher.launched.lock().len(), 3);
}

#[tokio::test]
async fn test_submit_afterCompletedRun_shouldReturnCachedJob() {
    let (repo, launcher, admission) = setup(2);
    let url = "https://www.youtube.com/watch?v=cached";

    let mut job = admission
        .submit(url, job_config())
        .await
        .unwrap()
        .into_job()
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.message, ACCEPTED_MESSAGE);

    job.status = JobStatus::Completed;
    job.progress = 100;
    job.slide_count = Some(12);
    repo.save_job(&job).await.unwrap();

    let again = admission.submit(url, job_config()).await.unwrap();
    match again {
        Admission::Cached(cached) => {
            assert_eq!(cached.id, job.id);
            assert_eq!(cached.slide_count, Some(12));
        }
        other => panic!("expected cached job, got {:?}", other),
    }
    assert_eq!(repo.list_jobs(10, 0).await.unwrap().len(), 1);
    assert_eq!(launcher.launched.lock().as_slice(), &[job.id]);
}

#[tokio::test]
async fn test_submit_withFailedPriorRun_shouldStartANewJob() {
    let (repo, _launcher, admission) = setup(2);
    let url = "https://youtube.com/watch?v=retry";

    let mut job = admission.submit(url, job_config()).await.unwrap().into_job().unwrap();
    job.status = JobStatus::Failed;
    repo.save_job(&job).await.unwrap();

    let again = admission.submit(url, job_config()).await.unwrap();
    match again {
        Admission::Accepted(new_job) => assert_ne!(new_job.id, job.id),
        other => panic!("expected a new job, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_withInvalidInput_shouldRaiseValidationError() {
    let (repo, launcher, admission) = setup(2);

    let err = admission
        .submit("https://vimeo.com/123", job_config())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Validation(_))
    ));

    let mut config = job_config();
    config.image_quality = 0;
    let err = admission
        .submit("https://youtube.com/watch?v=q", config)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Validation(_))
    ));

    assert!(repo.list_jobs(10, 0).await.unwrap().is_empty());
    assert!(launcher.launched.lock().is_empty());
}
