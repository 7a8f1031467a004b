//! Requests that interleave with another write between their read and their commit.

use super::common::*;
use crate::marketplace::applications::ApplicationStatus;
use crate::marketplace::error::MarketplaceError;
use crate::marketplace::jobs::JobStatus;
use crate::marketplace::store::Collection;

#[tokio::test]
async fn application_landing_mid_accept_refuses_the_accept() {
    let harness = gated_harness();
    let job = post_job(&harness).await;
    assert_eq!(job.applications_revision, 0);
    let first = harness
        .lifecycle
        .submit(&professional("a"), &job.id, proposal(100_000.0))
        .await
        .expect("a applies");

    let (reached, release) = harness.store.hold_next_write(Collection::ChatRooms);
    let owner = client();
    let (accepted, late) = tokio::join!(harness.lifecycle.accept(&owner, &first.id), async {
        reached.await.expect("accept reaches its commit");
        let late = harness
            .lifecycle
            .submit(&professional("b"), &job.id, proposal(90_000.0))
            .await
            .expect("b applies while the accept is in flight");
        release.send(()).expect("accept still parked");
        late
    });

    assert!(matches!(
        accepted,
        Err(MarketplaceError::InvalidStateTransition { .. })
    ));
    let stored = harness.board.get_job(&job.id).await.expect("job");
    assert_eq!(stored.status, JobStatus::Open);
    assert_eq!(stored.professional_id, None);
    assert_eq!(stored.application_count, 2);
    assert_eq!(stored.applications_revision, 2);
    for id in [&first.id, &late.id] {
        let application = harness.lifecycle.applications().fetch(id).await.expect("stored");
        assert_eq!(application.status, ApplicationStatus::Pending);
    }
    assert_eq!(harness.store.inner.count(Collection::ChatRooms), 0);

    let retried = harness
        .lifecycle
        .accept(&client(), &first.id)
        .await
        .expect("retry sees the late application");
    assert_eq!(retried.rejected, vec![late.id.clone()]);
    let late_now = harness.lifecycle.applications().fetch(&late.id).await.expect("late");
    assert_eq!(late_now.status, ApplicationStatus::Rejected);
}

#[tokio::test]
async fn cancel_loses_to_an_accept_that_commits_first() {
    let harness = gated_harness();
    let job = post_job(&harness).await;
    let application = harness
        .lifecycle
        .submit(&professional("a"), &job.id, proposal(100_000.0))
        .await
        .expect("a applies");

    let (reached, release) = harness.store.hold_next_write(Collection::Jobs);
    let owner = client();
    let (cancelled, accepted) = tokio::join!(
        harness
            .board
            .update_status(&owner, &job.id, JobStatus::Cancelled),
        async {
            reached.await.expect("cancel reaches its commit");
            let outcome = harness.lifecycle.accept(&client(), &application.id).await;
            release.send(()).expect("cancel still parked");
            outcome
        }
    );

    accepted.expect("accept commits first");
    assert!(matches!(
        cancelled,
        Err(MarketplaceError::InvalidStateTransition { .. })
    ));
    let stored = harness.board.get_job(&job.id).await.expect("job");
    assert_eq!(stored.status, JobStatus::Accepted);
    assert_eq!(stored.professional_id, Some(application.applicant_id.clone()));
}

#[tokio::test]
async fn overlapping_image_uploads_keep_both_urls() {
    let harness = gated_harness();
    let job = post_job(&harness).await;

    let (reached, release) = harness.store.hold_next_write(Collection::Jobs);
    let owner = client();
    let (first, second) = tokio::join!(
        harness
            .board
            .attach_image(&owner, &job.id, vec![0xFF, 0xD8, 0x01], mime::IMAGE_JPEG),
        async {
            reached.await.expect("first upload reaches its write");
            let second = harness
                .board
                .attach_image(&client(), &job.id, vec![0x89, 0x50, 0x02], mime::IMAGE_PNG)
                .await;
            release.send(()).expect("first upload still parked");
            second
        }
    );

    let second = second.expect("second upload");
    assert_eq!(second.image_urls.len(), 1);
    let first = first.expect("first upload");
    assert_eq!(first.image_urls.len(), 2);
    assert_eq!(first.image_urls[0], second.image_urls[0]);

    let stored = harness.board.get_job(&job.id).await.expect("job");
    assert_eq!(stored.image_urls, first.image_urls);
}

#[tokio::test]
async fn mark_all_viewed_stops_when_the_job_is_deleted_first() {
    let harness = gated_harness();
    let job = post_job(&harness).await;
    let application = harness
        .lifecycle
        .submit(&professional("a"), &job.id, proposal(80_000.0))
        .await
        .expect("a applies");

    let (reached, release) = harness.store.hold_next_write(Collection::Applications);
    let owner = client();
    let (marked, _) = tokio::join!(harness.lifecycle.mark_all_viewed(&owner, &job.id), async {
        reached.await.expect("mark reaches its commit");
        harness
            .board
            .delete_job(&client(), &job.id)
            .await
            .expect("owner deletes");
        release.send(()).expect("mark still parked");
    });

    assert!(matches!(
        marked,
        Err(MarketplaceError::NotFound { entity: "job", .. })
    ));
    let stored = harness
        .lifecycle
        .applications()
        .fetch(&application.id)
        .await
        .expect("application kept");
    assert!(!stored.read_by_client);
}
