use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::applications::{AcceptanceOutcome, Application, ApplicationProposal};
use super::chat::Message;
use super::error::MarketplaceError;
use super::identity::{Actor, AuthSession, Role};
use super::ids::{ApplicationId, ChatRoomId, JobId, UserId};
use super::jobs::{Job, JobDraft};
use super::notifications::{Notification, NotificationSink};
use super::store::{DocumentStore, StoreError};
use super::Marketplace;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_ROLE_HEADER: &str = "x-user-role";

type Shared<S, N> = State<Arc<Marketplace<S, N>>>;

/// HTTP endpoints for jobs, applications, chat, and notifications.
pub fn marketplace_router<S, N>(marketplace: Arc<Marketplace<S, N>>) -> Router
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/jobs",
            post(post_job_handler::<S, N>).get(open_jobs_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id",
            get(job_handler::<S, N>).delete(delete_job_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/applications",
            post(submit_handler::<S, N>).get(job_applications_handler::<S, N>),
        )
        .route(
            "/api/v1/jobs/:job_id/applications/viewed",
            post(mark_all_viewed_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/accept",
            post(accept_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/reject",
            post(reject_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/withdraw",
            post(withdraw_handler::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/viewed",
            post(mark_viewed_handler::<S, N>),
        )
        .route(
            "/api/v1/chats/:room_id/messages",
            get(messages_handler::<S, N>).post(send_message_handler::<S, N>),
        )
        .route("/api/v1/chats/:room_id/read", post(mark_read_handler::<S, N>))
        .route("/api/v1/notifications", get(notifications_handler::<S, N>))
        .with_state(marketplace)
}

impl MarketplaceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MarketplaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            MarketplaceError::DuplicateApplication { .. }
            | MarketplaceError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            MarketplaceError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            MarketplaceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            MarketplaceError::Invalid(_) | MarketplaceError::Media(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            MarketplaceError::Backend(StoreError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            MarketplaceError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MarketplaceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "marketplace request failed");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Caller identity carried in request headers by the upstream auth proxy.
struct HeaderSession<'a>(&'a HeaderMap);

impl HeaderSession<'_> {
    fn header(&self, name: &str) -> Option<String> {
        self.0
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

impl AuthSession for HeaderSession<'_> {
    fn current_user_id(&self) -> Option<UserId> {
        self.header(USER_ID_HEADER).map(UserId::from)
    }

    fn current_user_email(&self) -> Option<String> {
        None
    }
}

pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, MarketplaceError> {
    let session = HeaderSession(headers);
    let role = match session.header(USER_ROLE_HEADER) {
        Some(raw) => Role::parse(&raw)
            .ok_or_else(|| MarketplaceError::Invalid(format!("unknown role '{raw}'")))?,
        None => return Err(MarketplaceError::Unauthenticated),
    };
    let display_name = session
        .header(USER_NAME_HEADER)
        .or_else(|| session.header(USER_ID_HEADER))
        .unwrap_or_default();
    Actor::resolve(&session, display_name, role)
}

#[derive(Debug, Deserialize)]
pub(crate) struct RejectRequest {
    #[serde(default)]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageRequest {
    pub(crate) body: String,
}

pub(crate) async fn post_job_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Json(draft): Json<JobDraft>,
) -> Result<(StatusCode, Json<Job>), MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let job = marketplace.jobs.post_job(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub(crate) async fn open_jobs_handler<S, N>(
    State(marketplace): Shared<S, N>,
) -> Result<Json<Vec<Job>>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    Ok(Json(marketplace.jobs.open_jobs().await?))
}

pub(crate) async fn job_handler<S, N>(
    State(marketplace): Shared<S, N>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    Ok(Json(marketplace.jobs.get_job(&JobId(job_id)).await?))
}

pub(crate) async fn delete_job_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<StatusCode, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    marketplace.jobs.delete_job(&actor, &JobId(job_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn submit_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(proposal): Json<ApplicationProposal>,
) -> Result<(StatusCode, Json<Application>), MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let application = marketplace
        .applications
        .submit(&actor, &JobId(job_id), proposal)
        .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

pub(crate) async fn job_applications_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<Application>>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let applications = marketplace
        .applications
        .applications_for_job(&actor, &JobId(job_id))
        .await?;
    Ok(Json(applications))
}

pub(crate) async fn mark_all_viewed_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let marked = marketplace
        .applications
        .mark_all_viewed(&actor, &JobId(job_id))
        .await?;
    Ok(Json(json!({ "marked": marked })))
}

pub(crate) async fn application_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Json<Application>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let application = marketplace
        .applications
        .get_application(&actor, &ApplicationId(application_id))
        .await?;
    Ok(Json(application))
}

pub(crate) async fn accept_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Json<AcceptanceOutcome>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let outcome = marketplace
        .applications
        .accept(&actor, &ApplicationId(application_id))
        .await?;
    Ok(Json(outcome))
}

pub(crate) async fn reject_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    request: Option<Json<RejectRequest>>,
) -> Result<Json<Application>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let message = request.and_then(|Json(request)| request.message);
    let application = marketplace
        .applications
        .reject(&actor, &ApplicationId(application_id), message)
        .await?;
    Ok(Json(application))
}

pub(crate) async fn withdraw_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Json<Application>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let application = marketplace
        .applications
        .withdraw(&actor, &ApplicationId(application_id))
        .await?;
    Ok(Json(application))
}

pub(crate) async fn mark_viewed_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Json<Application>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let application = marketplace
        .applications
        .mark_viewed(&actor, &ApplicationId(application_id))
        .await?;
    Ok(Json(application))
}

pub(crate) async fn messages_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Message>>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let messages = marketplace
        .chat
        .messages(&actor, &ChatRoomId(room_id))
        .await?;
    Ok(Json(messages))
}

pub(crate) async fn send_message_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let message = marketplace
        .chat
        .send_message(&actor, &ChatRoomId(room_id), &request.body)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub(crate) async fn mark_read_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> Result<StatusCode, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    marketplace
        .chat
        .mark_read(&actor, &ChatRoomId(room_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn notifications_handler<S, N>(
    State(marketplace): Shared<S, N>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>, MarketplaceError>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    let actor = actor_from_headers(&headers)?;
    Ok(Json(marketplace.inbox.for_user(&actor).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::media::MemoryObjectStorage;
    use crate::marketplace::store::MemoryDocumentStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Discard(Mutex<usize>);

    impl NotificationSink for Discard {
        fn enqueue(&self, _notification: Notification) {
            *self.0.lock().expect("sink mutex poisoned") += 1;
        }
    }

    fn router() -> Router {
        let marketplace = Marketplace::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(Discard::default()),
            Arc::new(MemoryObjectStorage::default()),
            20,
        );
        marketplace_router(Arc::new(marketplace))
    }

    fn request(method: &str, uri: &str, user: Option<(&str, &str)>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some((id, role)) = user {
            builder = builder
                .header(USER_ID_HEADER, id)
                .header(USER_NAME_HEADER, format!("User {id}"))
                .header(USER_ROLE_HEADER, role);
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    async fn read_json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    fn job_body() -> Value {
        json!({
            "title": "Fix leaking roof",
            "description": "Two leaks above the kitchen",
            "category": "Roofing",
            "location": "Ajah, Lagos",
            "budget": 60000.0
        })
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let response = router()
            .oneshot(request("POST", "/api/v1/jobs", None, job_body()))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let response = router()
            .oneshot(request(
                "POST",
                "/api/v1/jobs",
                Some(("client-1", "landlord")),
                job_body(),
            ))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let response = router()
            .oneshot(request(
                "GET",
                "/api/v1/applications/missing",
                Some(("client-1", "client")),
                Value::Null,
            ))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_json_body(response).await;
        assert!(body["error"].as_str().expect("error text").contains("missing"));
    }

    #[tokio::test]
    async fn duplicate_submission_maps_to_conflict() {
        let app = router();
        let created = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/jobs",
                Some(("client-1", "client")),
                job_body(),
            ))
            .await
            .expect("router responds");
        assert_eq!(created.status(), StatusCode::CREATED);
        let job = read_json_body(created).await;
        let uri = format!(
            "/api/v1/jobs/{}/applications",
            job["id"].as_str().expect("job id")
        );
        let proposal = json!({ "proposedPrice": 55000.0, "coverLetter": "Available this week" });

        let first = app
            .clone()
            .oneshot(request("POST", &uri, Some(("pro-1", "professional")), proposal.clone()))
            .await
            .expect("router responds");
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .clone()
            .oneshot(request("POST", &uri, Some(("pro-1", "professional")), proposal))
            .await
            .expect("router responds");
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let forbidden = app
            .oneshot(request("GET", &uri, Some(("pro-1", "professional")), Value::Null))
            .await
            .expect("router responds");
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn backend_outages_map_to_service_unavailable() {
        let err = MarketplaceError::Backend(StoreError::Unavailable("offline".to_string()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let err = MarketplaceError::Backend(StoreError::Codec("bad".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
