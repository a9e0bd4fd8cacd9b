//! Borrow/return endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    models::{HistoryEvent, Item, ItemId, UserId},
};

use super::AuthenticatedUser;

/// Outcome message for borrow and return
#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

fn book_id(raw: i32) -> AppResult<ItemId> {
    if raw < 1 {
        return Err(AppError::BadRequest("Invalid book ID".to_string()));
    }
    Ok(ItemId(raw))
}

fn user_id(raw: i32) -> AppResult<UserId> {
    if raw < 1 {
        return Err(AppError::BadRequest("Invalid user ID".to_string()));
    }
    Ok(UserId(raw))
}

/// Borrow a book for the authenticated user
#[utoipa::path(
    post,
    path = "/borrow/books/{book_id}/borrow",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(
        ("book_id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book borrowed", body = MessageResponse),
        (status = 400, description = "Invalid book ID"),
        (status = 404, description = "User or book not found"),
        (status = 409, description = "Book is already borrowed")
    )
)]
pub async fn borrow_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(raw_book_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let item_id = book_id(raw_book_id)?;
    let user_id = claims.user_id()?;

    let borrowed = state.services.circulation.borrow_book(user_id, item_id).await?;
    if !borrowed {
        return Err(AppError::Conflict("Book is already borrowed".to_string()));
    }

    Ok(Json(MessageResponse {
        message: "Book borrowed successfully".to_string(),
    }))
}

/// Return a book held by the authenticated user
#[utoipa::path(
    post,
    path = "/borrow/books/{book_id}/return",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(
        ("book_id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book returned", body = MessageResponse),
        (status = 400, description = "Book not borrowed, or borrowed by someone else"),
        (status = 404, description = "Book not found")
    )
)]
pub async fn return_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(raw_book_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    let item_id = book_id(raw_book_id)?;
    let user_id = claims.user_id()?;

    state.services.circulation.return_book(user_id, item_id).await?;

    Ok(Json(MessageResponse {
        message: "Book returned successfully".to_string(),
    }))
}

/// Borrow/return history of a user
#[utoipa::path(
    get,
    path = "/borrow/users/{user_id}/history",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User history", body = Vec<HistoryEvent>),
        (status = 403, description = "Another user's history"),
        (status = 404, description = "User not found")
    )
)]
pub async fn user_history(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(raw_user_id): Path<i32>,
) -> AppResult<Json<Vec<HistoryEvent>>> {
    let user_id = user_id(raw_user_id)?;
    claims.require_self_or_admin(user_id)?;

    let history = state.services.circulation.user_history(user_id).await?;
    Ok(Json(history))
}

/// Borrow/return history of a book
#[utoipa::path(
    get,
    path = "/borrow/books/{book_id}/history",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(
        ("book_id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Book history", body = Vec<HistoryEvent>),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn book_history(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(raw_book_id): Path<i32>,
) -> AppResult<Json<Vec<HistoryEvent>>> {
    let item_id = book_id(raw_book_id)?;
    claims.require_admin()?;

    Ok(Json(state.services.circulation.book_history(item_id).await))
}

/// Books currently borrowed by a user
#[utoipa::path(
    get,
    path = "/borrow/users/{user_id}/borrowed",
    tag = "borrow",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = i32, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Borrowed books", body = Vec<Item>),
        (status = 403, description = "Another user's books"),
        (status = 404, description = "User not found")
    )
)]
pub async fn borrowed_books(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(raw_user_id): Path<i32>,
) -> AppResult<Json<Vec<Item>>> {
    let user_id = user_id(raw_user_id)?;
    claims.require_self_or_admin(user_id)?;

    let items = state
        .services
        .circulation
        .borrowed_books_by_user(user_id)
        .await?;
    Ok(Json(items))
}

/// All overdue books
#[utoipa::path(
    get,
    path = "/borrow/overdue",
    tag = "borrow",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Overdue books", body = Vec<Item>),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn overdue_books(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<Item>>> {
    claims.require_admin()?;

    Ok(Json(state.services.circulation.overdue_books().await))
}
