/*!
 * Tests for the SQLite job store against a file database
 */

use tubeslides::database::models::{JobStatus, NewJob};
use tubeslides::database::{DatabaseConnection, JobRepository};
use tubeslides::pipeline::collaborators::JobStore;

use crate::common::{self, job_config};

fn new_job(url: &str) -> NewJob {
    NewJob {
        url: url.to_string(),
        config: job_config(),
        message: "job created, waiting".to_string(),
    }
}

#[tokio::test]
async fn test_reopen_shouldKeepJobsAndFailInterruptedOnes() {
    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("db").join("tubeslides.db");

    let (done_id, running_id) = {
        let repo = JobRepository::new(DatabaseConnection::new(&db_path).unwrap());
        let mut done = repo.create(&new_job("https://youtu.be/done")).await.unwrap();
        done.status = JobStatus::Completed;
        done.progress = 100;
        done.output_path = Some("/tmp/deck.json".to_string());
        repo.save_job(&done).await.unwrap();

        let mut running = repo.create(&new_job("https://youtu.be/running")).await.unwrap();
        running.status = JobStatus::ExtractingFrames;
        running.progress = 80;
        repo.save_job(&running).await.unwrap();
        (done.id, running.id)
    };

    let repo = JobRepository::new(DatabaseConnection::new(&db_path).unwrap());
    assert_eq!(repo.fail_orphaned_jobs("interrupted by a restart").await.unwrap(), 1);

    let done = repo.get_job(done_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.output_path.as_deref(), Some("/tmp/deck.json"));

    let running = repo.get_job(running_id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Failed);
    assert_eq!(running.progress, 80);
    assert_eq!(running.message, "interrupted by a restart");

    let stats = repo.connection().stats().unwrap();
    assert_eq!(stats.total_jobs, 2);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.failed_jobs, 1);
}

#[tokio::test]
async fn test_jobStore_shouldRoundTripThroughTraitObject() {
    let repo = JobRepository::new_in_memory().unwrap();
    let created = repo.create(&new_job("https://youtu.be/x")).await.unwrap();
    let store: &dyn JobStore = &repo;

    let mut job = store.get(created.id).await.unwrap().unwrap();
    job.status = JobStatus::Translating;
    job.progress = 67;
    job.message = "translating captions to en".to_string();
    store.save(&job).await.unwrap();

    let stored = store.get(created.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Translating);
    assert_eq!(stored.message, "translating captions to en");
    assert!(store.get(created.id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn test_listJobs_withOffset_shouldPage() {
    let repo = JobRepository::new_in_memory().unwrap();
    for i in 0..5 {
        repo.create(&new_job(&format!("https://youtu.be/{}", i))).await.unwrap();
    }

    let page = repo.list_jobs(2, 1).await.unwrap();
    let urls: Vec<&str> = page.iter().map(|job| job.url.as_str()).collect();
    assert_eq!(urls, vec!["https://youtu.be/3", "https://youtu.be/2"]);
}
