/*!
 * Tests for the application controller over a real SQLite store and fake tools
 */

use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tubeslides::database::models::{JobStatus, NewJob};
use tubeslides::database::JobRepository;
use tubeslides::errors::PipelineError;
use tubeslides::event_bus::{StageEvent, StreamFrame};
use tubeslides::{Admission, Controller};

use crate::common::mock_collaborators::{FakeVideoSource, MockSet};
use crate::common::{self, job_config, SIMPLE_VTT};

const URL: &str = "https://www.youtube.com/watch?v=controller";

async fn setup(
    data_dir: &Path,
    ceiling: usize,
    video: FakeVideoSource,
) -> (Controller, MockSet, Arc<JobRepository>) {
    let mut config = common::test_config(data_dir);
    config.admission.max_concurrent_jobs = ceiling;
    let repo = Arc::new(JobRepository::new_in_memory().unwrap());
    let mocks = MockSet::new(video);
    let controller = Controller::with_collaborators(config, repo.clone(), mocks.collaborators(repo.clone()))
        .await
        .unwrap();
    (controller, mocks, repo)
}

/// Follow a job's stream to its end and return the last event
async fn wait_for_end(controller: &Controller, id: i64) -> StageEvent {
    let mut stream = controller.stream(id).await.unwrap();
    let mut last = None;
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream stalled")
    {
        if let StreamFrame::Event(event) = frame {
            last = Some(event);
        }
    }
    last.expect("stream ended without an event")
}

fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.downcast_ref::<PipelineError>()
}

#[tokio::test]
async fn test_submit_thenStream_shouldEndInCompleted() {
    common::init_test_logging();
    let dir = common::create_temp_dir().unwrap();
    let (controller, _mocks, _repo) = setup(dir.path(), 2, FakeVideoSource::with_captions(SIMPLE_VTT)).await;

    let job = controller.submit(URL, job_config()).await.unwrap().into_job().unwrap();
    let last = wait_for_end(&controller, job.id).await;

    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(last.message, "done, 3 slides");

    let stored = controller.job(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.slide_count, Some(3));

    // A finished job replays its final state once
    let frames: Vec<StreamFrame> = controller.stream(job.id).await.unwrap().collect().await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], StreamFrame::Event(e) if e.status == JobStatus::Completed));
}

#[tokio::test]
async fn test_submit_sameUrlAfterCompletion_shouldReturnCachedJob() {
    let dir = common::create_temp_dir().unwrap();
    let (controller, mocks, _repo) = setup(dir.path(), 2, FakeVideoSource::with_captions(SIMPLE_VTT)).await;

    let first = controller.submit(URL, job_config()).await.unwrap().into_job().unwrap();
    wait_for_end(&controller, first.id).await;

    match controller.submit(URL, job_config()).await.unwrap() {
        Admission::Cached(job) => {
            assert_eq!(job.id, first.id);
            assert_eq!(job.status, JobStatus::Completed);
        }
        other => panic!("expected cached job, got {:?}", other),
    }
    assert_eq!(controller.list_jobs(10, 0).await.unwrap().len(), 1);
    assert_eq!(mocks.video.requested_languages().len(), 1);
}

#[tokio::test]
async fn test_submit_atCeiling_shouldRefuseUntilCancelled() {
    common::init_test_logging();
    let dir = common::create_temp_dir().unwrap();
    let mut video = FakeVideoSource::with_captions(SIMPLE_VTT);
    video.video_delay = Duration::from_secs(30);
    let (controller, _mocks, _repo) = setup(dir.path(), 1, video).await;

    let running = controller
        .submit("https://youtu.be/slow", job_config())
        .await
        .unwrap()
        .into_job()
        .unwrap();

    let refused = controller.submit(URL, job_config()).await.unwrap();
    assert_eq!(refused, Admission::Overloaded { active: 1, ceiling: 1 });

    let err = controller.delete_job(running.id).await.unwrap_err();
    assert!(matches!(pipeline_error(&err), Some(PipelineError::Validation(_))));

    let cancelled = tokio::time::timeout(Duration::from_secs(5), controller.cancel(running.id))
        .await
        .expect("cancel hung")
        .unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(cancelled.error.as_deref(), Some("job cancelled"));
    assert!(!controller.runner().is_running(running.id));

    let accepted = controller.submit(URL, job_config()).await.unwrap();
    assert!(matches!(accepted, Admission::Accepted(_)));
    controller.shutdown().await;
    assert_eq!(controller.runner().running_count(), 0);
}

#[tokio::test]
async fn test_start_withUnfinishedJob_shouldFailItAsOrphaned() {
    let dir = common::create_temp_dir().unwrap();
    let repo = Arc::new(JobRepository::new_in_memory().unwrap());
    let mut job = repo
        .create(&NewJob {
            url: URL.to_string(),
            config: job_config(),
            message: "job created, waiting".to_string(),
        })
        .await
        .unwrap();
    job.status = JobStatus::DownloadingVideo;
    job.progress = 30;
    repo.save_job(&job).await.unwrap();

    let mocks = MockSet::new(FakeVideoSource::default());
    let controller = Controller::with_collaborators(
        common::test_config(dir.path()),
        repo.clone(),
        mocks.collaborators(repo.clone()),
    )
    .await
    .unwrap();

    let orphan = controller.job(job.id).await.unwrap();
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(orphan.progress, 30);
    assert_eq!(orphan.message, "interrupted by a restart");

    let last = wait_for_end(&controller, job.id).await;
    assert_eq!(last.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_cancel_withJobNotRunningHere_shouldMarkItFailed() {
    let dir = common::create_temp_dir().unwrap();
    let (controller, _mocks, repo) = setup(dir.path(), 2, FakeVideoSource::default()).await;

    let job = repo
        .create(&NewJob {
            url: URL.to_string(),
            config: job_config(),
            message: "job created, waiting".to_string(),
        })
        .await
        .unwrap();

    let mut subscription = controller.bus().subscribe(job.id);
    let cancelled = controller.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(cancelled.message, "job cancelled");
    assert_eq!(subscription.try_recv().map(|e| e.status), Some(JobStatus::Failed));

    // Cancelling again leaves the terminal record alone
    let again = controller.cancel(job.id).await.unwrap();
    assert_eq!(again.status, JobStatus::Failed);
    assert_eq!(again.error.as_deref(), Some("job cancelled"));
    assert!(subscription.try_recv().is_none());
}

#[tokio::test]
async fn test_deleteJob_afterCompletion_shouldRemoveRecordAndWorkDir() {
    let dir = common::create_temp_dir().unwrap();
    let (controller, _mocks, _repo) = setup(dir.path(), 2, FakeVideoSource::with_captions(SIMPLE_VTT)).await;

    let job = controller.submit(URL, job_config()).await.unwrap().into_job().unwrap();
    wait_for_end(&controller, job.id).await;
    let work_dir = controller.config().jobs_path().join(job.id.to_string());
    assert!(work_dir.exists());

    // The runner drops its entry right after the terminal event
    for _ in 0..50 {
        if !controller.runner().is_running(job.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio_test::assert_ok!(controller.delete_job(job.id).await);
    assert!(!work_dir.exists());

    let err = controller.job(job.id).await.unwrap_err();
    assert!(matches!(pipeline_error(&err), Some(PipelineError::NotFound(_))));
    let err = controller.delete_job(job.id).await.unwrap_err();
    assert!(matches!(pipeline_error(&err), Some(PipelineError::NotFound(_))));
}
