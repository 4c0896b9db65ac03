use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use quartier_db::queries::market::{MarketItemChanges, NewMarketItem};
use quartier_types::api::{
    DeletedResponse, MarketItem, MarketItemRequest, Page, UpdateMarketItemRequest, UploadedUrls,
};
use quartier_types::rules::{PageQuery, require_text, require_unique, validate_email, validate_phone};

use crate::error::{ApiError, ApiResult};
use crate::files::{Form, UploadKind};
use crate::guards::{ensure_allowed, ensure_author_or_admin, ensure_same_iris, scope_for};
use crate::middleware::CurrentUser;
use crate::state::AppState;

const TITLE_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 5000;

fn check_price(price: Option<f64>) -> ApiResult<Option<f64>> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(ApiError::bad_request("price must be zero or more")),
        other => Ok(other),
    }
}

fn check_description(value: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.chars().count() > DESCRIPTION_MAX {
        return Err(ApiError::bad_request(format!(
            "description must be at most {} characters",
            DESCRIPTION_MAX
        )));
    }
    Ok(value.to_string())
}

async fn load_item(state: &AppState, id: Uuid) -> ApiResult<MarketItem> {
    state
        .run(move |db| db.get_market_item(id))
        .await?
        .ok_or_else(|| ApiError::not_found("Market item not found"))
}

/// GET /market
///
/// Oldest first.
pub async fn list_items(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<MarketItem>>> {
    let paging = query.resolve(10);
    let scope = scope_for(&me);
    let (items, total) = state.run(move |db| db.list_market_items(scope.as_deref(), paging)).await?;
    Ok(Json(Page::new(items, total, paging)))
}

/// GET /market/{id}
pub async fn get_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MarketItem>> {
    let item = load_item(&state, id).await?;
    ensure_same_iris(&me, &item.iris_code)?;
    Ok(Json(item))
}

/// POST /market
pub async fn create_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<MarketItemRequest>,
) -> ApiResult<impl IntoResponse> {
    ensure_allowed(&state, &me, "publish_market").await?;
    let title = require_text("title", &req.title, TITLE_MAX)?;
    let description = check_description(&req.description)?;
    let price = check_price(req.price)?;
    require_unique("images", &req.images)?;
    let contact_email = validate_email(&req.contact_email)?;
    let contact_phone = req.contact_phone.as_deref().map(validate_phone).transpose()?;
    let images = req.images;

    let item = state
        .run(move |db| {
            db.create_market_item(
                &me,
                &NewMarketItem {
                    title: &title,
                    description: &description,
                    price,
                    images: &images,
                    contact_email: &contact_email,
                    contact_phone: contact_phone.as_deref(),
                },
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// PATCH /market/{id}
pub async fn update_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateMarketItemRequest>,
) -> ApiResult<Json<MarketItem>> {
    let item = load_item(&state, id).await?;
    ensure_same_iris(&me, &item.iris_code)?;
    ensure_author_or_admin(&me, item.author.id)?;

    if let Some(images) = &req.images {
        require_unique("images", images)?;
    }
    let changes = MarketItemChanges {
        title: req.title.as_deref().map(|v| require_text("title", v, TITLE_MAX)).transpose()?,
        description: req.description.as_deref().map(check_description).transpose()?,
        price: check_price(req.price)?,
        images: req.images,
        contact_email: req.contact_email.as_deref().map(validate_email).transpose()?,
        contact_phone: req.contact_phone.as_deref().map(validate_phone).transpose()?,
    };

    let item = state
        .run(move |db| db.update_market_item(id, &changes))
        .await?
        .ok_or_else(|| ApiError::not_found("Market item not found"))?;
    Ok(Json(item))
}

/// DELETE /market/{id}
pub async fn delete_item(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    let item = load_item(&state, id).await?;
    ensure_same_iris(&me, &item.iris_code)?;
    ensure_author_or_admin(&me, item.author.id)?;
    let deleted = state.run(move |db| db.delete_market_item(id)).await?;
    for image in &item.images {
        state.uploads.remove(image).await;
    }
    Ok(Json(DeletedResponse { deleted }))
}

/// POST /market/upload-images
pub async fn upload_images(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Json<UploadedUrls>> {
    let form = Form::read(multipart).await?;
    let urls = state.uploads.save_images(UploadKind::Market, &form.files).await?;
    Ok(Json(UploadedUrls { urls }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_must_be_non_negative() {
        assert_eq!(check_price(None).unwrap(), None);
        assert_eq!(check_price(Some(0.0)).unwrap(), Some(0.0));
        assert!(check_price(Some(-1.0)).is_err());
        assert!(check_price(Some(f64::NAN)).is_err());
    }
}
