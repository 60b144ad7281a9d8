//! Submission surface: token gate, size gate, availability gate, and the
//! submit/status/result/cancel flows.

mod common;

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use common::*;
use qcloud_scheduler::api::models::{
    CancelJobRequest, GetJobResultRequest, GetJobStatusRequest, GetServiceStatusRequest,
};
use qcloud_scheduler::api::SubmissionApi;
use qcloud_scheduler::stores::{
    MemoryParameterStore, MemoryTokenService, ParameterStore, TokenInfo,
};
use qcloud_scheduler::{BackendStatusView, Clock, JobStatus, ServiceStatus};

const BACKEND_STATUS_PARAM: &str = "backend-status";

const STATUS_TOML: &str = r#"
[backends.emulator.guest]
status = "available"
description = "Emulator is up."

[backends.emulator.admin]
status = "available"
description = "Emulator is up."

[backends.qpu.guest]
status = "maintenance"
description = "Weekly maintenance."

[backends.qpu.admin]
status = "available"
description = "QPU is up."
"#;

struct SubmissionFixture {
    scheduler: SchedulerFixture,
    tokens: Arc<MemoryTokenService>,
    api: SubmissionApi,
}

async fn submission_fixture() -> SubmissionFixture {
    submission_fixture_with_limits(HashMap::from([
        ("admin".to_string(), 10 * 1024 * 1024),
        ("developer".to_string(), 10 * 1024 * 1024),
        ("guest".to_string(), 1024 * 1024),
    ]))
    .await
}

async fn submission_fixture_with_limits(max_job_bytes: HashMap<String, usize>) -> SubmissionFixture {
    let scheduler = scheduler_fixture().await;

    let tokens = Arc::new(MemoryTokenService::new());
    tokens.insert("guest-tok", token_info("guest"));
    tokens.insert("admin-tok", token_info("admin"));
    tokens.insert(
        "expired-tok",
        TokenInfo {
            role: "guest".to_string(),
            name: "expired".to_string(),
            expires_at: Some(t0() - Duration::seconds(1)),
        },
    );

    let params = Arc::new(MemoryParameterStore::new());
    params.set(BACKEND_STATUS_PARAM, STATUS_TOML);
    let backend_view = BackendStatusView::new(
        BACKEND_STATUS_PARAM,
        params as Arc<dyn ParameterStore>,
        false,
    )
    .await
    .unwrap();

    let api = SubmissionApi::new(
        Arc::clone(&tokens) as Arc<dyn qcloud_scheduler::stores::TokenService>,
        Arc::new(Mutex::new(backend_view)),
        Arc::clone(&scheduler.manager),
        max_job_bytes,
        Arc::clone(&scheduler.clock) as Arc<dyn Clock>,
    );

    SubmissionFixture {
        scheduler,
        tokens,
        api,
    }
}

mod token_gate {
    use super::*;

    #[tokio::test]
    async fn test_empty_token() {
        let fixture = submission_fixture().await;
        let response = fixture.api.submit_job(submit_request("emulator", 2, "")).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "UNAUTHENTICATED");
        assert_eq!(error.description, "Invalid token: Token is empty.");
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let fixture = submission_fixture().await;
        let response = fixture
            .api
            .submit_job(submit_request("emulator", 2, "who-dis"))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "UNAUTHENTICATED");
        assert!(error.description.contains("Token is not found"));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let fixture = submission_fixture().await;
        let response = fixture
            .api
            .submit_job(submit_request("emulator", 2, "expired-tok"))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "UNAUTHENTICATED");
        assert!(error.description.contains("Token is expired"));
    }

    #[tokio::test]
    async fn test_token_service_failure() {
        let fixture = submission_fixture().await;
        fixture.tokens.set_fail_lookups(true);
        let response = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "INTERNAL");
    }
}

mod submit {
    use super::*;

    #[tokio::test]
    async fn test_happy_path() {
        let fixture = submission_fixture().await;
        let response = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await;
        assert!(response.error.is_none());
        let job_id = response.job_id.unwrap();
        assert_eq!(
            fixture.scheduler.table.item_attr_s(&job_id, "status").unwrap(),
            "QUEUED"
        );
    }

    #[tokio::test]
    async fn test_size_limit_is_per_role() {
        let fixture = submission_fixture_with_limits(HashMap::from([
            ("guest".to_string(), 64),
            ("admin".to_string(), 10 * 1024 * 1024),
        ]))
        .await;

        let response = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "INVALID_ARGUMENT");
        assert!(error.description.contains("exceeds the allowed limit (64)"));

        // The same request passes under the admin cap.
        let response = fixture
            .api
            .submit_job(submit_request("emulator", 2, "admin-tok"))
            .await;
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_backend_under_maintenance() {
        let fixture = submission_fixture().await;
        let response = fixture
            .api
            .submit_job(submit_request("qpu", 2, "guest-tok"))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "UNAVAILABLE");
        assert_eq!(
            error.description,
            "The server is currently unavailable. Please try again later."
        );
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let fixture = submission_fixture().await;
        let response = fixture
            .api
            .submit_job(submit_request("nope", 2, "guest-tok"))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "INVALID_ARGUMENT");
        assert!(error.description.ends_with("nope is not a supported backend."));
    }
}

mod status_and_result {
    use super::*;
    use qcloud_scheduler::api::models::AssignNextJobRequest;

    #[tokio::test]
    async fn test_get_job_status() {
        let fixture = submission_fixture().await;
        let job_id = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await
            .job_id
            .unwrap();

        let response = fixture
            .api
            .get_job_status(GetJobStatusRequest {
                token: "guest-tok".to_string(),
                job_id: job_id.clone(),
            })
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.status, Some(JobStatus::Queued));
        let details = response.execution_details.unwrap();
        assert_eq!(details.timestamps.submitted_at, Some(t0()));
        assert_eq!(details.timestamps.queued_at, Some(t0()));
        assert_eq!(details.version.scheduler_version.as_deref(), Some("0.4.0"));
    }

    #[tokio::test]
    async fn test_get_job_status_unknown_job() {
        let fixture = submission_fixture().await;
        let response = fixture
            .api
            .get_job_status(GetJobStatusRequest {
                token: "guest-tok".to_string(),
                job_id: "missing".to_string(),
            })
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "NOT_FOUND");
        assert_eq!(error.description, "Job not found (ID: missing).");
    }

    #[tokio::test]
    async fn test_get_job_result_requires_completion() {
        let fixture = submission_fixture().await;
        let job_id = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await
            .job_id
            .unwrap();

        let response = fixture
            .api
            .get_job_result(GetJobResultRequest {
                token: "guest-tok".to_string(),
                job_id: job_id.clone(),
            })
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "INVALID_ARGUMENT");
        assert!(error.description.contains("The job is not completed"));
    }

    #[tokio::test]
    async fn test_get_job_result_after_completion() {
        let fixture = submission_fixture().await;
        let job_id = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await
            .job_id
            .unwrap();

        // Run the job to completion through the execution path.
        fixture
            .scheduler
            .manager
            .fetch_next_job_to_execute(&AssignNextJobRequest {
                backend: "emulator".to_string(),
            })
            .await;
        fixture
            .scheduler
            .blob_store
            .seed_object(&result_key(&job_id), b"result".to_vec());
        fixture
            .scheduler
            .manager
            .finalize_job(&success_report(&job_id))
            .await;

        let response = fixture
            .api
            .get_job_result(GetJobResultRequest {
                token: "guest-tok".to_string(),
                job_id: job_id.clone(),
            })
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.status, Some(JobStatus::Completed));
        assert!(response.result.unwrap().result_url.contains(&result_key(&job_id)));
    }
}

mod cancel_and_service_status {
    use super::*;

    #[tokio::test]
    async fn test_cancel_twice() {
        let fixture = submission_fixture().await;
        let job_id = fixture
            .api
            .submit_job(submit_request("emulator", 2, "guest-tok"))
            .await
            .job_id
            .unwrap();

        let first = fixture
            .api
            .cancel_job(CancelJobRequest {
                token: "guest-tok".to_string(),
                job_id: job_id.clone(),
            })
            .await;
        assert!(first.error.is_none());

        let second = fixture
            .api
            .cancel_job(CancelJobRequest {
                token: "guest-tok".to_string(),
                job_id: job_id.clone(),
            })
            .await;
        let error = second.error.unwrap();
        assert_eq!(error.code, "FAILED_PRECONDITION");
        assert_eq!(error.description, "The job can no longer be cancelled.");
        assert_eq!(
            fixture.scheduler.table.item_attr_s(&job_id, "status").unwrap(),
            "CANCELLED"
        );
    }

    #[tokio::test]
    async fn test_get_service_status() {
        let fixture = submission_fixture().await;

        let response = fixture
            .api
            .get_service_status(GetServiceStatusRequest {
                token: "guest-tok".to_string(),
                backend: "emulator".to_string(),
            })
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.status, Some(ServiceStatus::Available));
        assert_eq!(response.description, "Emulator is up.");

        // Maintenance reads as unavailable to the caller.
        let response = fixture
            .api
            .get_service_status(GetServiceStatusRequest {
                token: "guest-tok".to_string(),
                backend: "qpu".to_string(),
            })
            .await;
        assert_eq!(response.error.unwrap().code, "UNAVAILABLE");

        // The same backend is open for admins.
        let response = fixture
            .api
            .get_service_status(GetServiceStatusRequest {
                token: "admin-tok".to_string(),
                backend: "qpu".to_string(),
            })
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.status, Some(ServiceStatus::Available));
    }
}
