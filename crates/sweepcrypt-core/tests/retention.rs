//! Failed jobs stay visible for a while, then disappear on the next read.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{admin, alice, folder, DiskFixture, FailingTransform};
use sweepcrypt_core::{JobError, JobId, JobMode, JobState};

fn failing(retention: Duration) -> DiskFixture {
    DiskFixture::with(
        move |config| config.with_error_retention(retention),
        |inner| {
            Arc::new(FailingTransform {
                inner,
                fail_name: "a".to_string(),
            })
        },
    )
}

fn fail_job(fx: &DiskFixture) -> JobId {
    fx.write("docs/a", 10);
    let id = fx
        .controller
        .start(&alice(), &folder("docs"), JobMode::Encrypt, 1, 10)
        .unwrap();
    let report = fx.controller.tick(&alice(), &id, None).unwrap();
    assert_eq!(report.job.state, JobState::Error);
    id
}

#[test]
fn test_recent_failure_is_visible() {
    let fx = failing(sweepcrypt_core::DEFAULT_ERROR_RETENTION);
    let id = fail_job(&fx);

    let job = fx.controller.status(&alice(), &id).unwrap();
    assert_eq!(job.state, JobState::Error);
    assert!(job.error.unwrap().contains("injected failure"));
    assert_eq!(fx.controller.list_jobs(&admin()).unwrap().len(), 1);
}

#[test]
fn test_expired_failure_is_purged() {
    let fx = failing(Duration::ZERO);
    let id = fail_job(&fx);
    std::thread::sleep(Duration::from_millis(20));

    assert!(matches!(
        fx.controller.status(&alice(), &id),
        Err(JobError::NotFound { .. })
    ));
    assert!(!fx.state_dir().join(format!("jobs/{id}.json")).exists());
    assert!(!fx.state_dir().join(format!("jobs/{id}.lock")).exists());
    assert!(fx.controller.folders().job_status(&folder("docs")).unwrap().job.is_none());

    // Encryption flag set at start survives the purge
    assert!(fx.controller.folders().status(&folder("docs")).unwrap().encrypted);
}

#[test]
fn test_running_jobs_never_expire() {
    let fx = DiskFixture::with(|config| config.with_error_retention(Duration::ZERO), |t| t);
    fx.write("docs/a", 10);
    let id = fx
        .controller
        .start(&alice(), &folder("docs"), JobMode::Encrypt, 1, 10)
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(fx.controller.status(&alice(), &id).unwrap().state, JobState::Running);
}

#[test]
fn test_corrupt_record() {
    let fx = DiskFixture::new();
    fx.write("docs/a", 10);
    let id = fx
        .controller
        .start(&alice(), &folder("docs"), JobMode::Encrypt, 1, 10)
        .unwrap();
    fs::write(fx.state_dir().join(format!("jobs/{id}.json")), b"{ not json").unwrap();

    assert!(matches!(
        fx.controller.status(&alice(), &id),
        Err(JobError::Persistence { .. })
    ));
    assert!(fx.controller.list_jobs(&admin()).unwrap().is_empty());
}
