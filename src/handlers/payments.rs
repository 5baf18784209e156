use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::find_course;
use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{
        CheckoutResponse, Paginated, Pagination, Payment, PaymentIntentResponse, PaymentStatus,
    },
    payments::{CheckoutRequest, PaymentRef, WebhookEvent},
};

const SIGNATURE_HEADER: &str = "stripe-signature";

/// PaymentListQuery
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct PaymentListQuery {
    pub status: Option<PaymentStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Checks shared by checkout and intent creation, then records a pending payment for
/// the discounted price.
async fn start_payment(state: &AppState, user_id: Uuid, course_id: Uuid) -> AppResult<(Payment, CheckoutRequest)> {
    let course = find_course(&state.repo, course_id).await?;
    if !course.is_published() {
        return Err(AppError::not_found("Course not found"));
    }
    if course.is_free() {
        return Err(AppError::bad_request("This course is free; enroll directly"));
    }
    if course.instructor_id == user_id {
        return Err(AppError::bad_request("You cannot buy your own course"));
    }
    if state.repo.find_enrollment(user_id, course_id).await?.is_some() {
        return Err(AppError::conflict("Already enrolled in this course"));
    }
    let buyer = state
        .repo
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("User no longer exists"))?;

    let payment = state
        .repo
        .create_payment(user_id, course_id, course.effective_price(), state.config.currency.clone())
        .await?;

    let client_url = state.config.client_url.trim_end_matches('/');
    let request = CheckoutRequest {
        payment_id: payment.id,
        course_id,
        course_title: course.title.clone(),
        amount: payment.amount,
        currency: payment.currency.clone(),
        customer_email: buyer.email,
        success_url: format!(
            "{client_url}/courses/{course_id}?payment=success&session_id={{CHECKOUT_SESSION_ID}}"
        ),
        cancel_url: format!("{client_url}/courses/{course_id}?payment=cancelled"),
    };
    Ok((payment, request))
}

/// Marks the payment failed after a provider error and passes the error on.
async fn abandon_payment(state: &AppState, payment_id: Uuid, err: AppError) -> AppError {
    tracing::error!(%payment_id, error = %err, "payment provider call failed");
    if let Err(e) = state.repo.set_payment_status(payment_id, PaymentStatus::Failed).await {
        tracing::error!(%payment_id, error = %e, "could not mark payment failed");
    }
    err
}

/// create_checkout
///
/// [Authenticated Route] Starts a hosted checkout for a paid course.
#[utoipa::path(
    post,
    path = "/api/v1/payments/checkout/{course_id}",
    tag = "payments",
    params(("course_id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Free or own course"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled"),
        (status = 502, description = "Payment provider error")
    )
)]
pub async fn create_checkout(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> AppResult<Json<CheckoutResponse>> {
    let (payment, request) = start_payment(&state, user_id, course_id).await?;

    let session = match state.payments.create_checkout_session(&request).await {
        Ok(session) => session,
        Err(e) => return Err(abandon_payment(&state, payment.id, e).await),
    };
    state
        .repo
        .attach_payment_provider_ids(payment.id, Some(session.id.clone()), None)
        .await?;

    tracing::info!(payment_id = %payment.id, %user_id, %course_id, "checkout session created");
    Ok(Json(CheckoutResponse {
        payment_id: payment.id,
        session_id: session.id,
        checkout_url: session.url,
    }))
}

/// create_payment_intent
///
/// [Authenticated Route] Starts an embedded card payment for a paid course.
#[utoipa::path(
    post,
    path = "/api/v1/payments/intent/{course_id}",
    tag = "payments",
    params(("course_id" = Uuid, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Payment intent created", body = PaymentIntentResponse),
        (status = 400, description = "Free or own course"),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already enrolled"),
        (status = 502, description = "Payment provider error")
    )
)]
pub async fn create_payment_intent(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> AppResult<Json<PaymentIntentResponse>> {
    let (payment, request) = start_payment(&state, user_id, course_id).await?;

    let intent = match state.payments.create_payment_intent(&request).await {
        Ok(intent) => intent,
        Err(e) => return Err(abandon_payment(&state, payment.id, e).await),
    };
    state
        .repo
        .attach_payment_provider_ids(payment.id, None, Some(intent.id))
        .await?;

    Ok(Json(PaymentIntentResponse {
        payment_id: payment.id,
        client_secret: intent.client_secret,
    }))
}

/// Resolves the local payment an event refers to.
async fn locate_payment(state: &AppState, reference: &PaymentRef) -> AppResult<Option<Payment>> {
    if let Some(payment) = state.repo.find_payment_by_provider_id(&reference.provider_id).await? {
        return Ok(Some(payment));
    }
    if let Some(intent_id) = reference.intent_id.as_deref() {
        if let Some(payment) = state.repo.find_payment_by_provider_id(intent_id).await? {
            return Ok(Some(payment));
        }
    }
    match reference.payment_id {
        Some(id) => state.repo.get_payment(id).await,
        None => Ok(None),
    }
}

/// stripe_webhook
///
/// [Public Route] Stripe event delivery. The raw body is verified against the
/// `Stripe-Signature` header before anything is parsed. Redelivered events are safe:
/// a paid payment stays paid and enrollment is idempotent.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    tag = "payments",
    request_body(content = String, content_type = "application/json", description = "Raw Stripe event, verified against the Stripe-Signature header"),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Missing or invalid signature")
    )
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request("Missing Stripe-Signature header"))?;

    let event = state.payments.verify_webhook(&body, signature).inspect_err(|e| {
        tracing::warn!(error = %e, "rejected webhook");
    })?;

    match event {
        WebhookEvent::PaymentSucceeded(reference) => {
            let Some(payment) = locate_payment(&state, &reference).await? else {
                tracing::warn!(provider_id = %reference.provider_id, "payment event for unknown payment");
                return Ok(Json(json!({ "received": true })));
            };
            if payment.status != PaymentStatus::Paid {
                state.repo.set_payment_status(payment.id, PaymentStatus::Paid).await?;
            }
            if let Some(enrollment) = state.repo.create_enrollment(payment.user_id, payment.course_id).await? {
                tracing::info!(
                    payment_id = %payment.id,
                    enrollment_id = %enrollment.id,
                    "payment settled, student enrolled"
                );
            }
        }
        WebhookEvent::PaymentFailed(reference) => {
            if let Some(payment) = locate_payment(&state, &reference).await? {
                if payment.status == PaymentStatus::Pending {
                    state.repo.set_payment_status(payment.id, PaymentStatus::Failed).await?;
                    tracing::info!(payment_id = %payment.id, "payment failed");
                }
            }
        }
        WebhookEvent::Ignored(event_type) => {
            tracing::debug!(%event_type, "ignoring webhook event");
        }
    }

    Ok(Json(json!({ "received": true })))
}

/// my_payments
///
/// [Authenticated Route] The caller's payment history.
#[utoipa::path(
    get,
    path = "/api/v1/payments/me",
    tag = "payments",
    responses((status = 200, description = "Payments", body = Vec<Payment>))
)]
pub async fn my_payments(AuthUser { id, .. }: AuthUser, State(state): State<AppState>) -> AppResult<Json<Vec<Payment>>> {
    Ok(Json(state.repo.list_user_payments(id).await?))
}

/// admin_list_payments
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/api/v1/admin/payments",
    tag = "admin",
    params(PaymentListQuery),
    responses((status = 200, description = "Payments", body = Paginated<Payment>))
)]
pub async fn admin_list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentListQuery>,
) -> AppResult<Json<Paginated<Payment>>> {
    let page = state
        .repo
        .list_payments(query.status, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(page))
}
