//! Catalog service - books, copies, categories, and the inventory reconciler.
//!
//! Every copy-affecting operation runs in one transaction and finishes by
//! calling [`reconcile_book`], which recounts the cached `total_copies` /
//! `unavailable_copies` columns from the copy rows. Nothing else writes
//! those two columns.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::error::{AppError, AppResult};
use crate::models::book::{self, Entity as Book};
use crate::models::category::{self, Entity as Category};
use crate::models::copy::{self, Entity as Copy};
use crate::models::loan::{self, Entity as Loan};
use crate::models::{CopyStatus, LoanStatus};
use crate::realtime::{TOPIC_CATALOG, TOPIC_LOANS, user_topic};
use crate::services::circulation;
use crate::state::AppState;

const MAX_DESCRIPTION_WORDS: usize = 300;

#[derive(Debug, Deserialize)]
pub struct BookInput {
    pub title: String,
    pub author: String,
    pub publisher: Option<String>,
    pub year_published: Option<i32>,
    pub isbn: String,
    pub price: Option<i64>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub category_id: i32,
    /// Requested physical count. On create this many copies are made; on
    /// update a larger number grows the stock, a smaller one is ignored.
    pub total_copies: i32,
}

#[derive(Debug, Deserialize)]
pub struct CopyInput {
    pub book_id: i32,
    pub code: Option<String>,
    pub inventory_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CopyStatusInput {
    pub status: CopyStatus,
    pub inventory_number: Option<String>,
}

fn validate_book_input(input: &BookInput) -> AppResult<()> {
    if input.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if input.author.trim().is_empty() {
        return Err(AppError::Validation("author is required".to_string()));
    }
    if input.isbn.trim().is_empty() {
        return Err(AppError::Validation("isbn is required".to_string()));
    }
    if input.total_copies < 1 {
        return Err(AppError::Validation(
            "total_copies must be at least 1".to_string(),
        ));
    }
    if let Some(description) = &input.description {
        if description.split_whitespace().count() > MAX_DESCRIPTION_WORDS {
            return Err(AppError::Validation(format!(
                "description must be at most {} words",
                MAX_DESCRIPTION_WORDS
            )));
        }
    }
    Ok(())
}

/// Copy codes look like `HOB-12-003`: first three non-space characters of
/// the title uppercased, the book id, and a zero-padded sequence number.
fn copy_code_prefix(title: &str) -> String {
    let prefix: String = title
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(3)
        .collect::<String>()
        .to_uppercase();
    if prefix.is_empty() {
        "LIB".to_string()
    } else {
        prefix
    }
}

fn copy_code(title: &str, book_id: i32, seq: usize) -> String {
    format!("{}-{}-{:03}", copy_code_prefix(title), book_id, seq)
}

/// Next free sequence number for a book's copy codes. Derived from the
/// existing codes rather than the row count so deletions never make the
/// generator collide with a surviving code.
async fn next_copy_seq<C: ConnectionTrait>(conn: &C, book_id: i32) -> AppResult<usize> {
    let copies = Copy::find()
        .filter(copy::Column::BookId.eq(book_id))
        .all(conn)
        .await?;
    let max = copies
        .iter()
        .filter_map(|c| c.code.rsplit('-').next().and_then(|s| s.parse::<usize>().ok()))
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

/// Recompute the cached inventory counters for one book from its copy rows.
///
/// Runs inside the caller's transaction. Self-healing: whatever the stored
/// values were, after this call `total_copies` equals the row count and
/// `unavailable_copies` the number of lost/damaged rows.
pub async fn reconcile_book<C: ConnectionTrait>(conn: &C, book_id: i32) -> AppResult<(i32, i32)> {
    let total = Copy::find()
        .filter(copy::Column::BookId.eq(book_id))
        .count(conn)
        .await? as i32;
    let unavailable = Copy::find()
        .filter(copy::Column::BookId.eq(book_id))
        .filter(copy::Column::Status.is_in([CopyStatus::Lost, CopyStatus::Damaged]))
        .count(conn)
        .await? as i32;

    Book::update_many()
        .col_expr(book::Column::TotalCopies, Expr::value(total))
        .col_expr(book::Column::UnavailableCopies, Expr::value(unavailable))
        .col_expr(book::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(book::Column::Id.eq(book_id))
        .exec(conn)
        .await?;

    Ok((total, unavailable))
}

pub async fn create_book(state: &AppState, input: BookInput) -> AppResult<Value> {
    validate_book_input(&input)?;

    let txn = state.db.begin().await?;

    Category::find_by_id(input.category_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::Validation("category does not exist".to_string()))?;

    let duplicate = Book::find()
        .filter(book::Column::Isbn.eq(input.isbn.trim()))
        .one(&txn)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict("ISBN already in use".to_string()));
    }

    let now = Utc::now();
    let saved = book::ActiveModel {
        title: Set(input.title.trim().to_string()),
        author: Set(input.author.trim().to_string()),
        publisher: Set(input.publisher.clone()),
        year_published: Set(input.year_published),
        isbn: Set(input.isbn.trim().to_string()),
        price: Set(input.price),
        description: Set(input.description.clone()),
        cover: Set(input.cover.clone()),
        category_id: Set(input.category_id),
        total_copies: Set(0),
        unavailable_copies: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    for seq in 1..=input.total_copies as usize {
        copy::ActiveModel {
            book_id: Set(saved.id),
            code: Set(copy_code(&saved.title, saved.id, seq)),
            inventory_number: Set(None),
            status: Set(CopyStatus::Available),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    reconcile_book(&txn, saved.id).await?;
    txn.commit().await?;

    state
        .events
        .publish(TOPIC_CATALOG, json!({ "action": "book_created", "book_id": saved.id }));

    get_book(&state.db, saved.id).await
}

pub async fn update_book(state: &AppState, id: i32, input: BookInput) -> AppResult<Value> {
    validate_book_input(&input)?;

    let txn = state.db.begin().await?;

    let existing = Book::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;

    Category::find_by_id(input.category_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::Validation("category does not exist".to_string()))?;

    let duplicate = Book::find()
        .filter(book::Column::Isbn.eq(input.isbn.trim()))
        .filter(book::Column::Id.ne(id))
        .one(&txn)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict("ISBN already in use".to_string()));
    }

    let now = Utc::now();
    let mut active: book::ActiveModel = existing.into();
    active.title = Set(input.title.trim().to_string());
    active.author = Set(input.author.trim().to_string());
    active.publisher = Set(input.publisher.clone());
    active.year_published = Set(input.year_published);
    active.isbn = Set(input.isbn.trim().to_string());
    active.price = Set(input.price);
    active.description = Set(input.description.clone());
    active.cover = Set(input.cover.clone());
    active.category_id = Set(input.category_id);
    active.updated_at = Set(now);
    let updated = active.update(&txn).await?;

    // Stock only grows here: extra copies are added when the requested
    // total exceeds the physical count, never removed. The reconciler at
    // the end makes the stored counter match the true row count whatever
    // number was requested.
    let physical = Copy::find()
        .filter(copy::Column::BookId.eq(id))
        .count(&txn)
        .await?;
    if (input.total_copies as u64) > physical {
        let mut seq = next_copy_seq(&txn, id).await?;
        for _ in 0..(input.total_copies as u64 - physical) {
            copy::ActiveModel {
                book_id: Set(id),
                code: Set(copy_code(&updated.title, id, seq)),
                inventory_number: Set(None),
                status: Set(CopyStatus::Available),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            seq += 1;
        }
    }

    reconcile_book(&txn, id).await?;
    txn.commit().await?;

    state
        .events
        .publish(TOPIC_CATALOG, json!({ "action": "book_updated", "book_id": id }));

    get_book(&state.db, id).await
}

pub async fn delete_book(state: &AppState, id: i32) -> AppResult<()> {
    let txn = state.db.begin().await?;

    Book::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;

    let copy_ids: Vec<i32> = Copy::find()
        .filter(copy::Column::BookId.eq(id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();

    if !copy_ids.is_empty() {
        let active = Loan::find()
            .filter(loan::Column::CopyId.is_in(copy_ids))
            .filter(loan::Column::Status.is_in([LoanStatus::Booking, LoanStatus::OnLoan]))
            .count(&txn)
            .await?;
        if active > 0 {
            return Err(AppError::InvalidState(
                "book has copies on active loan".to_string(),
            ));
        }
    }

    // Copies and loan history cascade
    Book::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    state
        .events
        .publish(TOPIC_CATALOG, json!({ "action": "book_deleted", "book_id": id }));

    Ok(())
}

fn book_row(book: &book::Model, category_name: Option<&str>, active: i64) -> Value {
    let available = (book.total_copies as i64 - book.unavailable_copies as i64 - active).max(0);
    json!({
        "id": book.id,
        "title": book.title,
        "author": book.author,
        "publisher": book.publisher,
        "year_published": book.year_published,
        "isbn": book.isbn,
        "price": book.price,
        "description": book.description,
        "cover": book.cover,
        "category_id": book.category_id,
        "category_name": category_name,
        "total_copies": book.total_copies,
        "unavailable_copies": book.unavailable_copies,
        "available_copies": available,
        "created_at": book.created_at,
        "updated_at": book.updated_at,
    })
}

pub async fn list_books(db: &DatabaseConnection) -> AppResult<Vec<Value>> {
    let books = Book::find()
        .order_by_asc(book::Column::Title)
        .find_also_related(Category)
        .all(db)
        .await?;

    // One pass over the active copies gives every book's allocation count
    let mut active_by_book: HashMap<i32, i64> = HashMap::new();
    let active_copies = Copy::find()
        .filter(copy::Column::Status.is_in([CopyStatus::Booked, CopyStatus::OnLoan]))
        .all(db)
        .await?;
    for c in active_copies {
        *active_by_book.entry(c.book_id).or_insert(0) += 1;
    }

    let rows = books
        .iter()
        .map(|(b, cat)| {
            let active = active_by_book.get(&b.id).copied().unwrap_or(0);
            book_row(b, cat.as_ref().map(|c| c.name.as_str()), active)
        })
        .collect();
    Ok(rows)
}

pub async fn get_book(db: &DatabaseConnection, id: i32) -> AppResult<Value> {
    let (book, category) = Book::find_by_id(id)
        .find_also_related(Category)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;

    let copies = Copy::find()
        .filter(copy::Column::BookId.eq(id))
        .order_by_asc(copy::Column::Id)
        .all(db)
        .await?;

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for c in &copies {
        let key = match c.status {
            CopyStatus::Available => "available",
            CopyStatus::Booked => "booked",
            CopyStatus::OnLoan => "on_loan",
            CopyStatus::Lost => "lost",
            CopyStatus::Damaged => "damaged",
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    let active =
        counts.get("booked").copied().unwrap_or(0) + counts.get("on_loan").copied().unwrap_or(0);

    let mut row = book_row(&book, category.as_ref().map(|c| c.name.as_str()), active);
    row["status_counts"] = json!({
        "available": counts.get("available").copied().unwrap_or(0),
        "booked": counts.get("booked").copied().unwrap_or(0),
        "on_loan": counts.get("on_loan").copied().unwrap_or(0),
        "lost": counts.get("lost").copied().unwrap_or(0),
        "damaged": counts.get("damaged").copied().unwrap_or(0),
    });
    row["copies"] = json!(
        copies
            .iter()
            .map(|c| json!({
                "id": c.id,
                "code": c.code,
                "inventory_number": c.inventory_number,
                "status": c.status,
            }))
            .collect::<Vec<_>>()
    );
    Ok(row)
}

pub async fn create_copy(state: &AppState, input: CopyInput) -> AppResult<copy::Model> {
    let txn = state.db.begin().await?;

    let book = Book::find_by_id(input.book_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;

    let code = match input.code {
        Some(code) if !code.trim().is_empty() => code.trim().to_string(),
        _ => {
            let seq = next_copy_seq(&txn, book.id).await?;
            copy_code(&book.title, book.id, seq)
        }
    };

    let duplicate = Copy::find()
        .filter(copy::Column::Code.eq(&code))
        .one(&txn)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(format!("copy code {} already in use", code)));
    }

    let now = Utc::now();
    let saved = copy::ActiveModel {
        book_id: Set(book.id),
        code: Set(code),
        inventory_number: Set(input.inventory_number),
        status: Set(CopyStatus::Available),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    reconcile_book(&txn, book.id).await?;
    txn.commit().await?;

    state
        .events
        .publish(TOPIC_CATALOG, json!({ "action": "copy_created", "copy_id": saved.id }));

    Ok(saved)
}

pub async fn list_copies(db: &DatabaseConnection, book_id: Option<i32>) -> AppResult<Vec<Value>> {
    let mut query = Copy::find().order_by_asc(copy::Column::Id);
    if let Some(book_id) = book_id {
        query = query.filter(copy::Column::BookId.eq(book_id));
    }
    let copies = query.find_also_related(Book).all(db).await?;

    let rows = copies
        .into_iter()
        .map(|(c, b)| {
            json!({
                "id": c.id,
                "book_id": c.book_id,
                "book_title": b.as_ref().map(|b| b.title.clone()),
                "code": c.code,
                "inventory_number": c.inventory_number,
                "status": c.status,
                "created_at": c.created_at,
                "updated_at": c.updated_at,
            })
        })
        .collect();
    Ok(rows)
}

pub async fn get_copy(db: &DatabaseConnection, id: i32) -> AppResult<Value> {
    let (c, b) = Copy::find_by_id(id)
        .find_also_related(Book)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("copy not found".to_string()))?;

    Ok(json!({
        "id": c.id,
        "book_id": c.book_id,
        "book_title": b.as_ref().map(|b| b.title.clone()),
        "code": c.code,
        "inventory_number": c.inventory_number,
        "status": c.status,
        "created_at": c.created_at,
        "updated_at": c.updated_at,
    }))
}

/// Manual status edit for one physical copy.
///
/// Only `available`, `lost` and `damaged` may be set by hand; `booked` and
/// `on_loan` belong to the loan ledger. Marking a copy lost or damaged
/// while a loan is active folds that loan into `returned` with the
/// replacement fine.
pub async fn update_copy_status(
    state: &AppState,
    id: i32,
    input: CopyStatusInput,
) -> AppResult<Value> {
    if !matches!(
        input.status,
        CopyStatus::Available | CopyStatus::Lost | CopyStatus::Damaged
    ) {
        return Err(AppError::Validation(
            "status must be available, lost or damaged".to_string(),
        ));
    }

    let txn = state.db.begin().await?;

    let target = Copy::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("copy not found".to_string()))?;

    let now = Utc::now();
    let fold = match input.status {
        CopyStatus::Available => {
            let active = Loan::find()
                .filter(loan::Column::CopyId.eq(id))
                .filter(loan::Column::Status.is_in([LoanStatus::Booking, LoanStatus::OnLoan]))
                .count(&txn)
                .await?;
            if active > 0 {
                return Err(AppError::InvalidState(
                    "copy has an active loan; resolve the loan instead".to_string(),
                ));
            }
            None
        }
        _ => circulation::fold_active_loan(&txn, &target, input.status.clone(), now).await?,
    };

    let book_id = target.book_id;
    let mut active: copy::ActiveModel = target.into();
    active.status = Set(input.status);
    if let Some(inventory_number) = input.inventory_number {
        active.inventory_number = Set(Some(inventory_number));
    }
    active.updated_at = Set(now);
    active.update(&txn).await?;

    reconcile_book(&txn, book_id).await?;
    txn.commit().await?;

    if let Some(outcome) = fold {
        state.notify(&outcome.student_phone, outcome.message.clone());
        state.events.publish(TOPIC_LOANS, json!({ "loan_id": outcome.loan_id }));
        state.events.publish(
            &user_topic(outcome.student_user_id),
            json!({ "message": outcome.message }),
        );
    }
    state
        .events
        .publish(TOPIC_CATALOG, json!({ "action": "copy_updated", "copy_id": id }));

    get_copy(&state.db, id).await
}

pub async fn delete_copy(state: &AppState, id: i32) -> AppResult<()> {
    let txn = state.db.begin().await?;

    let target = Copy::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("copy not found".to_string()))?;

    if target.status != CopyStatus::Available {
        return Err(AppError::InvalidState(format!(
            "only available copies can be deleted, this one is {}",
            target.status.to_value()
        )));
    }

    let history = Loan::find()
        .filter(loan::Column::CopyId.eq(id))
        .count(&txn)
        .await?;
    if history > 0 {
        return Err(AppError::InvalidState(
            "copy has loan history and cannot be deleted".to_string(),
        ));
    }

    let book_id = target.book_id;
    Copy::delete_by_id(id).exec(&txn).await?;
    reconcile_book(&txn, book_id).await?;
    txn.commit().await?;

    state
        .events
        .publish(TOPIC_CATALOG, json!({ "action": "copy_deleted", "copy_id": id }));

    Ok(())
}

// --- categories ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CategoryInput {
    pub name: String,
}

pub async fn list_categories(db: &DatabaseConnection) -> AppResult<Vec<category::Model>> {
    Ok(Category::find()
        .order_by_asc(category::Column::Name)
        .all(db)
        .await?)
}

pub async fn create_category(state: &AppState, input: CategoryInput) -> AppResult<category::Model> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }

    let duplicate = Category::find()
        .filter(category::Column::Name.eq(&name))
        .one(&state.db)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict("category already exists".to_string()));
    }

    let now = Utc::now();
    let saved = category::ActiveModel {
        name: Set(name),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    Ok(saved)
}

pub async fn update_category(
    state: &AppState,
    id: i32,
    input: CategoryInput,
) -> AppResult<category::Model> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }

    let existing = Category::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("category not found".to_string()))?;

    let duplicate = Category::find()
        .filter(category::Column::Name.eq(&name))
        .filter(category::Column::Id.ne(id))
        .one(&state.db)
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict("category already exists".to_string()));
    }

    let mut active: category::ActiveModel = existing.into();
    active.name = Set(name);
    active.updated_at = Set(Utc::now());
    Ok(active.update(&state.db).await?)
}

pub async fn delete_category(state: &AppState, id: i32) -> AppResult<()> {
    Category::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("category not found".to_string()))?;

    let in_use = Book::find()
        .filter(book::Column::CategoryId.eq(id))
        .count(&state.db)
        .await?;
    if in_use > 0 {
        return Err(AppError::InvalidState(
            "category is referenced by books".to_string(),
        ));
    }

    Category::delete_by_id(id).exec(&state.db).await?;
    Ok(())
}
