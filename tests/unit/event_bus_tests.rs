/*!
 * Tests for the per-job event bus
 */

use futures::StreamExt;
use std::time::Duration;

use tubeslides::database::models::JobStatus;
use tubeslides::event_bus::{EventBus, StageEvent, StreamFrame, DEFAULT_MAILBOX_CAPACITY};

fn event(job_id: i64, status: JobStatus, progress: u8) -> StageEvent {
    StageEvent {
        job_id,
        status,
        progress,
        message: format!("step {}", progress),
        error: None,
        output_path: None,
    }
}

#[test]
fn test_publish_hundredEvents_shouldDeliverAllInOrder() {
    let bus = EventBus::default();
    let mut subscription = bus.subscribe(1);

    for i in 0..100u8 {
        assert_eq!(bus.publish(1, &event(1, JobStatus::ExtractingFrames, i)), 1);
    }

    let received: Vec<u8> = std::iter::from_fn(|| subscription.try_recv())
        .map(|e| e.progress)
        .collect();
    assert_eq!(received, (0..100u8).collect::<Vec<_>>());
}

#[test]
fn test_publish_withFullMailbox_shouldDropSilently() {
    let bus = EventBus::default();
    let mut subscription = bus.subscribe(1);

    for i in 0..DEFAULT_MAILBOX_CAPACITY {
        bus.publish(1, &event(1, JobStatus::DownloadingVideo, (i % 100) as u8));
    }
    // The 101st event finds the mailbox full
    assert_eq!(bus.publish(1, &event(1, JobStatus::Completed, 100)), 0);

    let received: Vec<StageEvent> = std::iter::from_fn(|| subscription.try_recv()).collect();
    assert_eq!(received.len(), DEFAULT_MAILBOX_CAPACITY);
    assert!(received.iter().all(|e| e.status == JobStatus::DownloadingVideo));
}

#[test]
fn test_publish_withSlowSubscriber_shouldStillReachOthers() {
    let bus = EventBus::new(2, Duration::from_secs(30));
    let mut slow = bus.subscribe(7);
    let mut fast = bus.subscribe(7);

    bus.publish(7, &event(7, JobStatus::Pending, 0));
    bus.publish(7, &event(7, JobStatus::FetchingMetadata, 5));
    assert!(fast.try_recv().is_some());
    assert!(fast.try_recv().is_some());

    assert_eq!(bus.publish(7, &event(7, JobStatus::FetchingMetadata, 10)), 1);
    assert_eq!(fast.try_recv().map(|e| e.progress), Some(10));
    assert_eq!(slow.try_recv().map(|e| e.progress), Some(0));
}

#[test]
fn test_publish_shouldOnlyReachSubscribersOfThatJob() {
    let bus = EventBus::default();
    let mut one = bus.subscribe(1);
    let mut two = bus.subscribe(2);

    bus.publish(2, &event(2, JobStatus::Translating, 66));

    assert!(one.try_recv().is_none());
    assert_eq!(two.try_recv().map(|e| e.job_id), Some(2));
}

#[tokio::test]
async fn test_stream_whenIdle_shouldEmitHeartbeats() {
    let bus = EventBus::new(10, Duration::from_millis(20));
    let mut stream = Box::pin(bus.stream(3));

    assert_eq!(stream.next().await, Some(StreamFrame::Heartbeat));
    assert_eq!(stream.next().await, Some(StreamFrame::Heartbeat));
    assert_eq!(bus.subscriber_count(3), 1);

    bus.publish(3, &event(3, JobStatus::Failed, 40));
    match stream.next().await {
        Some(StreamFrame::Event(e)) => assert_eq!(e.status, JobStatus::Failed),
        other => panic!("expected terminal event, got {:?}", other),
    }
    assert_eq!(stream.next().await, None);
    assert!(!bus.has_entry(3));
}

#[tokio::test]
async fn test_stream_eachCall_shouldSubscribeIndependently() {
    let bus = EventBus::default();
    let first = bus.stream(9);
    let second = bus.stream(9);
    assert_eq!(bus.subscriber_count(9), 2);

    drop(first);
    assert_eq!(bus.subscriber_count(9), 1);
    drop(second);
    assert!(!bus.has_entry(9));
}

#[test]
fn test_streamFrame_event_shouldSerializeStatusInSnakeCase() {
    let frame = StreamFrame::Event(event(4, JobStatus::ExtractingFrames, 80));
    let json = frame.to_json();
    assert_eq!(json["status"], "extracting_frames");
    assert_eq!(json["progress"], 80);
    assert!(json.get("error").is_none());
}
