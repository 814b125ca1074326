//! End-to-end job lifecycle tests against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use common::{Behavior, FakeProvider, Harness, job_id, reference};
use vidkeep::Error;
use vidkeep::database::repositories::{JobRepository, SqlxJobRepository};
use vidkeep::domain::{FailureCode, Job, JobState, MediaReference};
use vidkeep::progress::ProgressEvent;
use vidkeep::services::ServiceContainer;

const A: &str = "aaaaaaaaaaa";
const B: &str = "bbbbbbbbbbb";
const C: &str = "ccccccccccc";

/// Collect events for one job until its terminal status arrives.
async fn drain_until_terminal(sub: &mut vidkeep::progress::Subscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for events")
            .expect("subscription closed");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn percents(events: &[ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_submit_runs_to_complete() {
        let h = Harness::start(2).await;
        h.provider.script(A, Behavior::succeed(10_000));

        let job = h.services.scheduler.submit(&reference(A)).await.unwrap();
        assert_eq!(job.state, JobState::Pending);

        let job = h.wait_for(A, JobState::Complete).await;
        assert_eq!(job.progress, 100);
        let asset = job.asset.expect("complete job has an asset");
        assert_eq!(asset.size_bytes, 10_000);
        assert_eq!(asset.content_type, "video/mp4");
        assert_eq!(h.artifacts(A), vec![format!("{A}.mp4")]);

        h.services.shutdown().await;
    }

    #[tokio::test]
    async fn test_percent_is_monotonic_for_subscriber() {
        let h = Harness::start(1).await;
        h.provider.script(
            A,
            Behavior::Succeed {
                size: 1000,
                steps: vec![5, 20, 20, 40, 60, 80, 95],
            },
        );

        let mut sub = h.services.bus.subscribe(job_id(A));
        h.services.scheduler.submit(&reference(A)).await.unwrap();
        let events = drain_until_terminal(&mut sub).await;

        let seen = percents(&events);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last(), Some(&100));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Status { state: JobState::Complete, .. })
        ));
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_newer_progress() {
        let provider = FakeProvider::new();
        provider.set_step_delay(Duration::from_millis(150));
        provider.script(
            A,
            Behavior::Succeed {
                size: 1000,
                steps: vec![10, 55, 70, 90],
            },
        );
        let h = Harness::start_with(provider, 1).await;

        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for_progress(A, 55).await;
        let mut sub = h.services.bus.subscribe(job_id(A));

        let events = drain_until_terminal(&mut sub).await;
        let seen = percents(&events);
        assert!(seen.iter().all(|p| *p >= 55), "{seen:?}");
        assert!(seen.contains(&100));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_provider_failure_is_categorized() {
        let h = Harness::start(1).await;
        h.provider
            .script(A, Behavior::fail(FailureCode::Restricted, "Private video"));

        h.services.scheduler.submit(&reference(A)).await.unwrap();
        let job = h.wait_for(A, JobState::Failed).await;

        let error = job.error.expect("failed job carries an error");
        assert_eq!(error.code, FailureCode::Restricted);
        assert_eq!(error.detail, "Private video");
        assert!(h.artifacts(A).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_references_are_rejected() {
        let h = Harness::start(1).await;

        let err = h.services.scheduler.submit("").await.unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));

        let err = h
            .services
            .scheduler
            .submit("https://example.com/video.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert!(h.services.scheduler.list().is_empty());
        assert!(h.provider.calls().is_empty());
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_cancel_pending_never_dispatches() {
        let h = Harness::paused(1).await;
        let scheduler = &h.services.scheduler;

        scheduler.submit(&reference(A)).await.unwrap();
        let state = scheduler.cancel(&job_id(A)).await.unwrap();
        assert_eq!(state, JobState::Cancelled);
        assert_eq!(scheduler.queue_status().pending, 0);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.job(A).state, JobState::Cancelled);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_running_removes_partial_files() {
        let h = Harness::start(1).await;
        h.provider.script(
            A,
            Behavior::Hang {
                size: 1000,
                percent: 30,
            },
        );

        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for_progress(A, 30).await;
        assert!(!h.artifacts(A).is_empty());

        let state = h.services.scheduler.cancel(&job_id(A)).await.unwrap();
        assert_eq!(state, JobState::Running);

        let job = tokio::time::timeout(
            Duration::from_millis(500),
            h.wait_for(A, JobState::Cancelled),
        )
        .await
        .expect("cancel should land within a few throttle intervals");
        assert!(job.error.is_none());
        assert!(h.artifacts(A).is_empty());
    }

    #[tokio::test]
    async fn test_stubborn_provider_is_abandoned_after_grace() {
        let h = Harness::start(1).await;
        h.provider.script(
            A,
            Behavior::Stubborn {
                delay: Duration::from_secs(30),
            },
        );

        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for(A, JobState::Running).await;
        h.services.scheduler.cancel(&job_id(A)).await.unwrap();

        h.wait_for(A, JobState::Cancelled).await;
        assert!(h.artifacts(A).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_rejected() {
        let h = Harness::start(1).await;
        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for(A, JobState::Complete).await;

        let err = h.services.scheduler.cancel(&job_id(A)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(h.job(A).state, JobState::Complete);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_not_found() {
        let h = Harness::start(1).await;
        let err = h.services.scheduler.cancel(&job_id(A)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

mod admission {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_submission_conflicts() {
        let h = Harness::start(1).await;
        let gate = Arc::new(Notify::new());
        h.provider.script(
            A,
            Behavior::Gated {
                size: 100,
                gate: gate.clone(),
            },
        );

        h.services.scheduler.submit(&reference(A)).await.unwrap();
        // Same media through a different URL form.
        let err = h
            .services
            .scheduler
            .submit(&format!("https://www.youtube.com/watch?v={A}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.services.scheduler.list().len(), 1);

        h.wait_for(A, JobState::Running).await;
        gate.notify_one();
        h.wait_for(A, JobState::Complete).await;

        let err = h.services.scheduler.submit(&reference(A)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let h = Harness::start(1).await;
        h.provider
            .script(A, Behavior::fail(FailureCode::Network, "connection reset"));

        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for(A, JobState::Failed).await;

        h.provider.script(A, Behavior::succeed(2048));
        let job = h.services.scheduler.retry(&job_id(A)).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.error.is_none());

        let job = h.wait_for(A, JobState::Complete).await;
        assert_eq!(job.asset.unwrap().size_bytes, 2048);
        assert_eq!(h.provider.calls(), vec![A.to_string(), A.to_string()]);
    }

    #[tokio::test]
    async fn test_resubmitting_cancelled_job_requeues_it() {
        let h = Harness::paused(1).await;
        let scheduler = &h.services.scheduler;
        scheduler.submit(&reference(A)).await.unwrap();
        scheduler.cancel(&job_id(A)).await.unwrap();

        let job = scheduler.submit(&reference(A)).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(scheduler.queue_status().pending, 1);
    }

    #[tokio::test]
    async fn test_retry_complete_job_is_rejected() {
        let h = Harness::start(1).await;
        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for(A, JobState::Complete).await;

        let err = h.services.scheduler.retry(&job_id(A)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_files() {
        let h = Harness::start(1).await;
        h.services.scheduler.submit(&reference(A)).await.unwrap();
        h.wait_for(A, JobState::Complete).await;
        std::fs::write(
            h.dir.path().join("thumbnails").join(format!("{A}.jpg")),
            b"jpeg",
        )
        .unwrap();

        h.services.scheduler.delete(&job_id(A)).await.unwrap();

        assert!(h.artifacts(A).is_empty());
        assert!(!h.dir.path().join("thumbnails").join(format!("{A}.jpg")).exists());
        assert!(h.services.scheduler.get(&job_id(A)).unwrap_err().is_not_found());
        let repository = SqlxJobRepository::new(h.services.pool.clone());
        assert!(repository.get_record(&job_id(A)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_active_job_is_rejected() {
        let h = Harness::paused(1).await;
        h.services.scheduler.submit(&reference(A)).await.unwrap();

        let err = h.services.scheduler.delete(&job_id(A)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }
}

mod pool {
    use super::*;

    #[tokio::test]
    async fn test_jobs_dispatch_in_submission_order() {
        let h = Harness::paused(1).await;
        for id in [A, B, C] {
            h.services.scheduler.submit(&reference(id)).await.unwrap();
        }
        h.services.scheduler.start();

        for id in [A, B, C] {
            h.wait_for(id, JobState::Complete).await;
        }
        assert_eq!(h.provider.calls(), vec![A, B, C]);
        h.services.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_limit_is_respected() {
        let h = Harness::start(2).await;
        let gate = Arc::new(Notify::new());
        let ids = ["jjjjjjjjjj1", "jjjjjjjjjj2", "jjjjjjjjjj3", "jjjjjjjjjj4", "jjjjjjjjjj5"];
        for id in ids {
            h.provider.script(
                id,
                Behavior::Gated {
                    size: 64,
                    gate: gate.clone(),
                },
            );
            h.services.scheduler.submit(&reference(id)).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while h.provider.calls().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = h.services.scheduler.queue_status();
        assert_eq!(status.processing, 2);
        assert_eq!(status.pending, 3);
        assert_eq!(status.total, 5);

        while !ids
            .iter()
            .all(|id| h.job(id).state == JobState::Complete)
        {
            assert!(tokio::time::Instant::now() < deadline + Duration::from_secs(5));
            gate.notify_waiters();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(h.provider.peak_concurrency(), 2);
    }
}

mod recovery {
    use super::*;

    #[tokio::test]
    async fn test_interrupted_jobs_are_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let pool = common::setup_test_db().await;
        let repository = SqlxJobRepository::new(pool.clone());

        for id in [A, B] {
            let job = Job::new(MediaReference::parse(&reference(id)).unwrap());
            repository.create_record(&job).await.unwrap();
        }
        repository
            .update_state(&job_id(A), JobState::Running, None)
            .await
            .unwrap();
        let videos = dir.path().join("videos");
        std::fs::create_dir_all(&videos).unwrap();
        std::fs::write(videos.join(format!("{A}.mp4.part")), b"half").unwrap();

        let provider = FakeProvider::new();
        let services = ServiceContainer::new(&Harness::config(&dir, 1), pool, provider.clone());
        let report = services.initialize().await.unwrap();

        assert_eq!(report.restored, 2);
        assert_eq!(report.interrupted, 1);
        assert_eq!(report.requeued, 2);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        for id in [A, B] {
            while services.scheduler.get(&job_id(id)).unwrap().state != JobState::Complete {
                assert!(tokio::time::Instant::now() < deadline, "{id} not recovered");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        assert!(!videos.join(format!("{A}.mp4.part")).exists());
        assert_eq!(provider.calls(), vec![A, B]);

        services.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_restored_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let pool = common::setup_test_db().await;
        let repository = SqlxJobRepository::new(pool.clone());
        let job = Job::new(MediaReference::parse(&reference(A)).unwrap());
        repository.create_record(&job).await.unwrap();
        repository
            .update_state(&job_id(A), JobState::Cancelled, None)
            .await
            .unwrap();

        let provider = FakeProvider::new();
        let services = ServiceContainer::new(&Harness::config(&dir, 1), pool, provider.clone());
        let report = services.initialize().await.unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(
            services.scheduler.get(&job_id(A)).unwrap().state,
            JobState::Cancelled
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(provider.calls().is_empty());

        services.shutdown().await;
    }
}
