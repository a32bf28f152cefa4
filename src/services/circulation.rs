//! Circulation service - the loan ledger.
//!
//! All allocation and state changes of loans live here. Copy statuses
//! `booked` and `on_loan` are owned by this module: they are only ever
//! written together with the loan row that justifies them, inside the same
//! transaction, and the availability flip is a guarded conditional update
//! so two concurrent allocations can never hold the same copy.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::book::{self, Entity as Book};
use crate::models::copy::{self, Entity as Copy};
use crate::models::loan::{self, Entity as Loan};
use crate::models::student::{self, Entity as Student};
use crate::models::user::{self, Entity as User};
use crate::models::{CopyStatus, LoanStatus};
use crate::realtime::{TOPIC_LOANS, user_topic};
use crate::services::catalog::reconcile_book;
use crate::state::AppState;

pub const LOAN_PERIOD_DAYS: i64 = 7;
pub const MAX_ACTIVE_LOANS: u64 = 3;
/// Fine per started week of lateness, in currency units.
pub const WEEKLY_FINE: i64 = 10_000;
/// Replacement fine when a lost book has no recorded price.
pub const LOST_FINE_FALLBACK: i64 = 10_000;

const ACTIVE_STATUSES: [LoanStatus; 2] = [LoanStatus::Booking, LoanStatus::OnLoan];

#[derive(Debug, Deserialize)]
pub struct AllocateInput {
    pub book_id: i32,
    /// How many copies to allocate, default 1.
    pub quantity: Option<u32>,
    /// Staff-entered loans name the borrower; self-service omits this and
    /// the authenticated student borrows for themselves.
    pub student_id: Option<i32>,
    pub notes: Option<String>,
}

/// Requested loan state change. `lost` and `damaged` are outcomes rather
/// than stored statuses: they land the loan in `returned` with a fine and
/// mark the copy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanOutcome {
    OnLoan,
    Cancelled,
    Returned,
    Lost,
    Damaged,
}

impl LoanOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LoanOutcome::OnLoan => "on_loan",
            LoanOutcome::Cancelled => "cancelled",
            LoanOutcome::Returned => "returned",
            LoanOutcome::Lost => "lost",
            LoanOutcome::Damaged => "damaged",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransitionInput {
    pub status: LoanOutcome,
    /// Manual fine override; absent means 0. Ignored for lost/damaged,
    /// which always charge the book price or the flat fallback.
    pub fine: Option<i64>,
    /// Return date as `YYYY-MM-DD`; merged with the current time of day.
    pub returned_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LoanFilter {
    pub status: Option<LoanStatus>,
    pub student_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<LoanStatus>,
}

fn parse_date(s: &str) -> AppResult<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("invalid date: {}", s)))
}

/// Combine a `YYYY-MM-DD` user-supplied date with the current time of day,
/// falling back to now when absent.
fn merge_date_with_now(date: Option<&str>, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    match date {
        Some(s) => Ok(parse_date(s)?.and_time(now.time()).and_utc()),
        None => Ok(now),
    }
}

fn booking_code(now: DateTime<Utc>, copy_id: i32) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("BK{}-{}-{}", now.format("%Y%m%d"), copy_id, suffix)
}

/// Allocate `quantity` copies of a book to a student, all-or-nothing.
///
/// Self-service creates `booking` loans (30-minute pickup window enforced
/// by the sweeper); staff-entered loans start directly at `on_loan`. Every
/// check and flip happens in one transaction; a guarded update on each
/// copy aborts the whole allocation if anything else grabbed it first.
pub async fn allocate(
    state: &AppState,
    auth: &AuthUser,
    input: AllocateInput,
) -> AppResult<Vec<loan::Model>> {
    let quantity = input.quantity.unwrap_or(1);
    if quantity < 1 {
        return Err(AppError::Validation("quantity must be at least 1".to_string()));
    }

    let txn = state.db.begin().await?;

    let staff_entered = input.student_id.is_some();
    let student = match input.student_id {
        Some(student_id) => {
            auth.require_admin()?;
            Student::find_by_id(student_id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound("student not found".to_string()))?
        }
        None => Student::find()
            .filter(student::Column::UserId.eq(auth.user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("no student profile for this account".to_string()))?,
    };

    if student.status != crate::models::StudentStatus::Active {
        return Err(AppError::InvalidState(
            "student account is not active".to_string(),
        ));
    }

    let active = Loan::find()
        .filter(loan::Column::StudentId.eq(student.id))
        .filter(loan::Column::Status.is_in(ACTIVE_STATUSES))
        .count(&txn)
        .await?;
    if active + quantity as u64 > MAX_ACTIVE_LOANS {
        return Err(AppError::InvalidState(format!(
            "loan quota exceeded: {} active, {} requested, limit {}",
            active, quantity, MAX_ACTIVE_LOANS
        )));
    }

    let book = Book::find_by_id(input.book_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;

    let candidates = Copy::find()
        .filter(copy::Column::BookId.eq(book.id))
        .filter(copy::Column::Status.eq(CopyStatus::Available))
        .order_by_asc(copy::Column::Id)
        .limit(quantity as u64)
        .all(&txn)
        .await?;
    if (candidates.len() as u32) < quantity {
        return Err(AppError::InvalidState(format!(
            "insufficient stock: {} available, {} requested",
            candidates.len(),
            quantity
        )));
    }

    let now = Utc::now();
    let due = now + Duration::days(LOAN_PERIOD_DAYS);
    let (loan_status, copy_status) = if staff_entered {
        (LoanStatus::OnLoan, CopyStatus::OnLoan)
    } else {
        (LoanStatus::Booking, CopyStatus::Booked)
    };

    let mut created = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        // Guarded flip: the WHERE re-checks availability so a copy grabbed
        // by a concurrent allocation fails the rows_affected check and
        // rolls back this whole transaction.
        let flipped = Copy::update_many()
            .col_expr(copy::Column::Status, Expr::value(copy_status.clone()))
            .col_expr(copy::Column::UpdatedAt, Expr::value(now))
            .filter(copy::Column::Id.eq(candidate.id))
            .filter(copy::Column::Status.eq(CopyStatus::Available))
            .exec(&txn)
            .await?;
        if flipped.rows_affected != 1 {
            return Err(AppError::Conflict(format!(
                "copy {} was allocated concurrently",
                candidate.code
            )));
        }

        let saved = loan::ActiveModel {
            booking_code: Set(booking_code(now, candidate.id)),
            student_id: Set(student.id),
            copy_id: Set(candidate.id),
            status: Set(loan_status.clone()),
            loaned_at: Set(now),
            due_at: Set(due),
            returned_at: Set(None),
            fine: Set(0),
            notes: Set(input.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
        created.push(saved);
    }

    reconcile_book(&txn, book.id).await?;

    let borrower = User::find_by_id(student.user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    txn.commit().await?;

    let codes: Vec<String> = created.iter().map(|l| l.booking_code.clone()).collect();
    let message = if staff_entered {
        format!(
            "Hi {}, you borrowed \"{}\" ({}). Due back on {}.",
            borrower.full_name,
            book.title,
            codes.join(", "),
            due.format("%Y-%m-%d")
        )
    } else {
        format!(
            "Hi {}, your booking for \"{}\" is confirmed ({}). Please pick it up within 30 minutes or it will be cancelled automatically.",
            borrower.full_name,
            book.title,
            codes.join(", ")
        )
    };
    state.notify(&student.phone, message.clone());
    state.events.publish(
        TOPIC_LOANS,
        json!({
            "action": "allocated",
            "loan_ids": created.iter().map(|l| l.id).collect::<Vec<_>>(),
        }),
    );
    state
        .events
        .publish(&user_topic(student.user_id), json!({ "message": message }));

    Ok(created)
}

/// Apply one legal loan state change:
/// `booking -> on_loan | cancelled`, `on_loan -> returned | lost | damaged`.
/// Anything else is rejected. The copy follows the ledger in the same
/// transaction.
pub async fn transition(
    state: &AppState,
    loan_id: i32,
    input: TransitionInput,
) -> AppResult<loan::Model> {
    let txn = state.db.begin().await?;

    let target = Loan::find_by_id(loan_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("loan not found".to_string()))?;
    let held_copy = Copy::find_by_id(target.copy_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("copy not found".to_string()))?;
    let book = Book::find_by_id(held_copy.book_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;
    let student = Student::find_by_id(target.student_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("student not found".to_string()))?;
    let borrower = User::find_by_id(student.user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    let now = Utc::now();
    let mut active: loan::ActiveModel = target.clone().into();
    let new_copy_status: CopyStatus;
    let message: String;

    match (&target.status, &input.status) {
        (LoanStatus::Booking, LoanOutcome::OnLoan) => {
            // Pickup: the seven-day clock starts now, not at booking time
            let due = now + Duration::days(LOAN_PERIOD_DAYS);
            active.status = Set(LoanStatus::OnLoan);
            active.loaned_at = Set(now);
            active.due_at = Set(due);
            active.fine = Set(input.fine.unwrap_or(0));
            new_copy_status = CopyStatus::OnLoan;
            message = format!(
                "Hi {}, pickup confirmed for \"{}\". Due back on {}.",
                borrower.full_name,
                book.title,
                due.format("%Y-%m-%d")
            );
        }
        (LoanStatus::Booking, LoanOutcome::Cancelled) => {
            active.status = Set(LoanStatus::Cancelled);
            active.returned_at = Set(Some(now));
            new_copy_status = CopyStatus::Available;
            message = format!(
                "Hi {}, your booking {} for \"{}\" was cancelled.",
                borrower.full_name, target.booking_code, book.title
            );
        }
        (LoanStatus::OnLoan, LoanOutcome::Returned) => {
            let fine = input.fine.unwrap_or(0);
            let returned_at = merge_date_with_now(input.returned_date.as_deref(), now)?;
            active.status = Set(LoanStatus::Returned);
            active.returned_at = Set(Some(returned_at));
            active.fine = Set(fine);
            new_copy_status = CopyStatus::Available;
            message = if fine > 0 {
                format!(
                    "Hi {}, \"{}\" was returned. Outstanding fine: {}.",
                    borrower.full_name, book.title, fine
                )
            } else {
                format!(
                    "Hi {}, \"{}\" was returned. Thank you!",
                    borrower.full_name, book.title
                )
            };
        }
        (LoanStatus::OnLoan, LoanOutcome::Lost | LoanOutcome::Damaged) => {
            let fine = book.price.unwrap_or(LOST_FINE_FALLBACK);
            let returned_at = merge_date_with_now(input.returned_date.as_deref(), now)?;
            let label = input.status.as_str();
            active.status = Set(LoanStatus::Returned);
            active.returned_at = Set(Some(returned_at));
            active.fine = Set(fine);
            if target.notes.is_none() && input.notes.is_none() {
                active.notes = Set(Some(format!("Copy reported {}", label)));
            }
            new_copy_status = if input.status == LoanOutcome::Lost {
                CopyStatus::Lost
            } else {
                CopyStatus::Damaged
            };
            message = format!(
                "Hi {}, \"{}\" was recorded {}. A replacement fine of {} applies.",
                borrower.full_name, book.title, label, fine
            );
        }
        (from, to) => {
            return Err(AppError::InvalidState(format!(
                "cannot move a {} loan to {}",
                from.to_value(),
                to.as_str()
            )));
        }
    }

    if let Some(notes) = input.notes {
        active.notes = Set(Some(notes));
    }
    active.updated_at = Set(now);
    let updated = active.update(&txn).await?;

    let mut copy_active: copy::ActiveModel = held_copy.clone().into();
    copy_active.status = Set(new_copy_status);
    copy_active.updated_at = Set(now);
    copy_active.update(&txn).await?;

    reconcile_book(&txn, book.id).await?;
    txn.commit().await?;

    state.notify(&student.phone, message.clone());
    state.events.publish(
        TOPIC_LOANS,
        json!({ "loan_id": updated.id, "status": updated.status }),
    );
    state
        .events
        .publish(&user_topic(student.user_id), json!({ "message": message }));

    Ok(updated)
}

/// Administrative delete of a loan row. An active loan gives its copy
/// back; a terminal one leaves the copy alone (it may already be held by a
/// newer loan, or sit in lost/damaged).
pub async fn release(state: &AppState, loan_id: i32) -> AppResult<()> {
    let txn = state.db.begin().await?;

    let target = Loan::find_by_id(loan_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("loan not found".to_string()))?;
    let held_copy = Copy::find_by_id(target.copy_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("copy not found".to_string()))?;

    if target.status.is_active() {
        let mut copy_active: copy::ActiveModel = held_copy.clone().into();
        copy_active.status = Set(CopyStatus::Available);
        copy_active.updated_at = Set(Utc::now());
        copy_active.update(&txn).await?;
    }

    Loan::delete_by_id(loan_id).exec(&txn).await?;
    reconcile_book(&txn, held_copy.book_id).await?;
    txn.commit().await?;

    state
        .events
        .publish(TOPIC_LOANS, json!({ "action": "deleted", "loan_id": loan_id }));

    Ok(())
}

/// Flatten loan rows with their student, user, copy and book context into
/// API-shaped objects.
async fn flatten_loans<C: ConnectionTrait>(
    conn: &C,
    loans: Vec<loan::Model>,
) -> AppResult<Vec<Value>> {
    let student_ids: HashSet<i32> = loans.iter().map(|l| l.student_id).collect();
    let copy_ids: HashSet<i32> = loans.iter().map(|l| l.copy_id).collect();

    let mut students_by_id: HashMap<i32, student::Model> = HashMap::new();
    let mut users_by_id: HashMap<i32, user::Model> = HashMap::new();
    if !student_ids.is_empty() {
        let students = Student::find()
            .filter(student::Column::Id.is_in(student_ids.iter().copied()))
            .all(conn)
            .await?;
        let user_ids: Vec<i32> = students.iter().map(|s| s.user_id).collect();
        for s in students {
            students_by_id.insert(s.id, s);
        }
        for u in User::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(conn)
            .await?
        {
            users_by_id.insert(u.id, u);
        }
    }

    let mut copies_by_id: HashMap<i32, (copy::Model, Option<book::Model>)> = HashMap::new();
    if !copy_ids.is_empty() {
        let copies = Copy::find()
            .filter(copy::Column::Id.is_in(copy_ids.iter().copied()))
            .find_also_related(Book)
            .all(conn)
            .await?;
        for (c, b) in copies {
            copies_by_id.insert(c.id, (c, b));
        }
    }

    let rows = loans
        .into_iter()
        .map(|l| {
            let student = students_by_id.get(&l.student_id);
            let borrower = student.and_then(|s| users_by_id.get(&s.user_id));
            let copy_book = copies_by_id.get(&l.copy_id);
            json!({
                "id": l.id,
                "booking_code": l.booking_code,
                "status": l.status,
                "loaned_at": l.loaned_at,
                "due_at": l.due_at,
                "returned_at": l.returned_at,
                "fine": l.fine,
                "notes": l.notes,
                "student": student.map(|s| json!({
                    "id": s.id,
                    "student_number": s.student_number,
                    "class_name": s.class_name,
                    "full_name": borrower.map(|u| u.full_name.clone()),
                })),
                "copy": copy_book.map(|(c, _)| json!({ "id": c.id, "code": c.code })),
                "book": copy_book.and_then(|(_, b)| b.as_ref()).map(|b| json!({
                    "id": b.id,
                    "title": b.title,
                    "author": b.author,
                })),
            })
        })
        .collect();
    Ok(rows)
}

pub async fn list_loans(db: &DatabaseConnection, filter: LoanFilter) -> AppResult<Vec<Value>> {
    let mut condition = Condition::all();
    if let Some(status) = filter.status {
        condition = condition.add(loan::Column::Status.eq(status));
    }
    if let Some(student_id) = filter.student_id {
        condition = condition.add(loan::Column::StudentId.eq(student_id));
    }

    let loans = Loan::find()
        .filter(condition)
        .order_by_desc(loan::Column::CreatedAt)
        .all(db)
        .await?;
    flatten_loans(db, loans).await
}

/// Loan history of the authenticated student account.
pub async fn student_history(db: &DatabaseConnection, user_id: i32) -> AppResult<Vec<Value>> {
    let student = Student::find()
        .filter(student::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("no student profile for this account".to_string()))?;

    list_loans(
        db,
        LoanFilter {
            status: None,
            student_id: Some(student.id),
        },
    )
    .await
}

#[derive(Debug, FromQueryResult)]
struct MonthlyCount {
    month: i32,
    total: i64,
}

/// Loans started per month of `year`, as a 12-element array.
pub async fn chart_stats(db: &DatabaseConnection, year: i32) -> AppResult<Vec<i64>> {
    let rows = MonthlyCount::find_by_statement(Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"
        SELECT CAST(strftime('%m', loaned_at) AS INTEGER) AS month, COUNT(*) AS total
        FROM loans
        WHERE strftime('%Y', loaned_at) = ?
        GROUP BY month
        "#,
        [year.to_string().into()],
    ))
    .all(db)
    .await?;

    let mut months = vec![0i64; 12];
    for row in rows {
        if (1..=12).contains(&row.month) {
            months[(row.month - 1) as usize] = row.total;
        }
    }
    Ok(months)
}

/// Flattened loan rows for a date-range report.
pub async fn report(db: &DatabaseConnection, filter: ReportFilter) -> AppResult<Vec<Value>> {
    let mut condition = Condition::all();
    if let Some(s) = &filter.start_date {
        let start = parse_date(s)?
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        condition = condition.add(loan::Column::LoanedAt.gte(start));
    }
    if let Some(e) = &filter.end_date {
        // Inclusive end: everything before midnight of the next day
        let end = (parse_date(e)? + Duration::days(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        condition = condition.add(loan::Column::LoanedAt.lt(end));
    }
    if let Some(status) = filter.status {
        condition = condition.add(loan::Column::Status.eq(status));
    }

    let loans = Loan::find()
        .filter(condition)
        .order_by_desc(loan::Column::LoanedAt)
        .all(db)
        .await?;
    flatten_loans(db, loans).await
}

/// One active loan joined with everything the sweeper needs to decide and
/// to write a sensible message.
pub struct LoanContext {
    pub loan: loan::Model,
    pub student: student::Model,
    pub user: user::Model,
    pub copy: copy::Model,
    pub book: book::Model,
}

/// Load every active (booking or on_loan) loan with its related records.
/// Rows with dangling relations are logged and skipped.
pub async fn load_active_with_context(db: &DatabaseConnection) -> AppResult<Vec<LoanContext>> {
    let loans = Loan::find()
        .filter(loan::Column::Status.is_in(ACTIVE_STATUSES))
        .find_also_related(Student)
        .all(db)
        .await?;

    let user_ids: Vec<i32> = loans
        .iter()
        .filter_map(|(_, s)| s.as_ref().map(|s| s.user_id))
        .collect();
    let copy_ids: Vec<i32> = loans.iter().map(|(l, _)| l.copy_id).collect();

    let mut users_by_id: HashMap<i32, user::Model> = HashMap::new();
    if !user_ids.is_empty() {
        for u in User::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(db)
            .await?
        {
            users_by_id.insert(u.id, u);
        }
    }
    let mut copies_by_id: HashMap<i32, (copy::Model, Option<book::Model>)> = HashMap::new();
    if !copy_ids.is_empty() {
        for (c, b) in Copy::find()
            .filter(copy::Column::Id.is_in(copy_ids))
            .find_also_related(Book)
            .all(db)
            .await?
        {
            copies_by_id.insert(c.id, (c, b));
        }
    }

    let mut contexts = Vec::new();
    for (loan, student) in loans {
        let student = match student {
            Some(s) => s,
            None => {
                tracing::warn!(loan_id = loan.id, "active loan without student, skipping");
                continue;
            }
        };
        let user = match users_by_id.get(&student.user_id) {
            Some(u) => u.clone(),
            None => {
                tracing::warn!(loan_id = loan.id, "active loan without user, skipping");
                continue;
            }
        };
        let (copy, book) = match copies_by_id.get(&loan.copy_id) {
            Some((c, Some(b))) => (c.clone(), b.clone()),
            _ => {
                tracing::warn!(loan_id = loan.id, "active loan without copy/book, skipping");
                continue;
            }
        };
        contexts.push(LoanContext {
            loan,
            student,
            user,
            copy,
            book,
        });
    }
    Ok(contexts)
}

pub(crate) struct FoldOutcome {
    pub loan_id: i32,
    pub fine: i64,
    pub student_phone: String,
    pub student_user_id: i32,
    pub message: String,
}

/// Fold the active loan on a copy (if any) into `returned` because the
/// copy was reported lost or damaged. Runs inside the caller's
/// transaction; the caller flips the copy status itself.
pub(crate) async fn fold_active_loan(
    txn: &DatabaseTransaction,
    held_copy: &copy::Model,
    target: CopyStatus,
    now: DateTime<Utc>,
) -> AppResult<Option<FoldOutcome>> {
    let loan = match Loan::find()
        .filter(loan::Column::CopyId.eq(held_copy.id))
        .filter(loan::Column::Status.is_in(ACTIVE_STATUSES))
        .one(txn)
        .await?
    {
        Some(l) => l,
        None => return Ok(None),
    };

    let book = Book::find_by_id(held_copy.book_id)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::NotFound("book not found".to_string()))?;
    let student = Student::find_by_id(loan.student_id)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::NotFound("student not found".to_string()))?;
    let borrower = User::find_by_id(student.user_id)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;

    let fine = book.price.unwrap_or(LOST_FINE_FALLBACK);
    let label = if target == CopyStatus::Lost {
        "lost"
    } else {
        "damaged"
    };

    let mut active: loan::ActiveModel = loan.clone().into();
    active.status = Set(LoanStatus::Returned);
    active.returned_at = Set(Some(now));
    active.fine = Set(fine);
    if loan.notes.is_none() {
        active.notes = Set(Some(format!("Copy reported {}", label)));
    }
    active.updated_at = Set(now);
    active.update(txn).await?;

    let message = format!(
        "Hi {}, \"{}\" was recorded {}. A replacement fine of {} applies.",
        borrower.full_name, book.title, label, fine
    );

    Ok(Some(FoldOutcome {
        loan_id: loan.id,
        fine,
        student_phone: student.phone,
        student_user_id: student.user_id,
        message,
    }))
}
