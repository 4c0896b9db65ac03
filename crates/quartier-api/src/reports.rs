use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quartier_db::queries::reports::NewReport;
use quartier_types::api::{CreateReportRequest, DeletedResponse, Page, Report, UpdateReportStatusRequest};
use quartier_types::rules::{PageQuery, optional_text, require_text};

use crate::error::{ApiError, ApiResult};
use crate::guards::{ensure_allowed, ensure_same_iris, require_staff, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

async fn load_report(state: &AppState, id: Uuid) -> ApiResult<Report> {
    state
        .run(move |db| db.get_report(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Report not found"))
}

/// POST /reports
pub async fn create_report(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<CreateReportRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "send_report").await?;
    let reason = require_text("reason", &req.reason, 200)?;
    let content_id = optional_text("contentId", req.content_id.as_deref(), 100)?;
    let content_type = optional_text("contentType", req.content_type.as_deref(), 50)?;
    let description = optional_text("description", req.description.as_deref(), 2000)?;
    let reported_user_id = req.reported_user_id;

    let report = state
        .run(move |db| {
            if !db.user_exists(reported_user_id)? {
                return Ok(None);
            }
            db.create_report(
                &me,
                &NewReport {
                    reported_user_id,
                    reason: &reason,
                    content_id: content_id.as_deref(),
                    content_type: content_type.as_deref(),
                    description: description.as_deref(),
                },
            )
            .map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Reported user not found"))?;
    info!("Report {} filed against {}", report.id, report.reported_user.id);
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /reports
pub async fn list_reports(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Report>>> {
    require_staff(&me)?;
    let paging = query.resolve(5);
    let scope = scope_for(&me);
    let (reports, total) = state.run(move |db| db.list_reports(scope.as_deref(), paging)).await?;
    Ok(Json(Page::new(reports, total, paging)))
}

/// GET /reports/{id}
pub async fn get_report(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Report>> {
    require_staff(&me)?;
    let report = load_report(&state, id).await?;
    ensure_same_iris(&me, &report.iris_code)?;
    Ok(Json(report))
}

/// PATCH /reports/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateReportStatusRequest>,
) -> ApiResult<Json<Report>> {
    require_staff(&me)?;
    let report = load_report(&state, id).await?;
    ensure_same_iris(&me, &report.iris_code)?;

    let treated_by = me.id;
    let report = state
        .run(move |db| db.set_report_status(id, req.status, treated_by))
        .await?
        .ok_or_else(|| ApiError::not_found("Report not found"))?;
    info!("{} marked report {} as {}", treated_by, id, report.status);
    Ok(Json(report))
}

/// DELETE /reports/{id}
pub async fn delete_report(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    require_staff(&me)?;
    let report = load_report(&state, id).await?;
    ensure_same_iris(&me, &report.iris_code)?;
    let deleted = state.run(move |db| db.delete_report(id)).await?;
    Ok(Json(DeletedResponse { deleted }))
}
