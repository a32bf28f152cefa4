//! Time-driven loan sweeper.
//!
//! A single background task walks every active loan once per interval and
//! advances whatever the clock says must advance: stale bookings get a
//! pickup warning and then expire, due-tomorrow loans get a morning
//! reminder, overdue loans accrue fines. Each record is handled in its own
//! transaction and re-checked under it, so overlapping or repeated passes
//! converge on the same state instead of double-firing.

use chrono::{DateTime, Duration, Timelike, Utc};
use sea_orm::*;
use serde_json::json;

use crate::error::AppResult;
use crate::models::copy::{self, Entity as Copy};
use crate::models::loan::{self, Entity as Loan};
use crate::models::{CopyStatus, LoanStatus};
use crate::realtime::{TOPIC_LOANS, user_topic};
use crate::services::catalog::reconcile_book;
use crate::services::circulation::{self, LoanContext};
use crate::state::AppState;

/// Minutes after booking at which the pickup warning fires.
const BOOKING_WARNING_MINUTES: i64 = 20;
/// Minutes after booking at which an unclaimed booking is cancelled.
const BOOKING_EXPIRY_MINUTES: i64 = 30;
/// Hour of day (UTC) for the due-tomorrow reminder.
const REMINDER_HOUR: u32 = 8;

/// What one sweep pass actually did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: usize,
    pub warned: usize,
    pub reminded: usize,
    pub fined: usize,
}

pub async fn run(state: AppState, interval: std::time::Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "loan sweeper started");

    loop {
        match sweep(&state, Utc::now()).await {
            Ok(summary) if summary != SweepSummary::default() => {
                tracing::info!(
                    expired = summary.expired,
                    warned = summary.warned,
                    reminded = summary.reminded,
                    fined = summary.fined,
                    "sweep pass finished"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("sweep pass failed: {}", e);
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// One idempotent pass over all active loans at time `now`.
///
/// A failing record is logged and skipped; only failing to load the working
/// set at all aborts the pass.
pub async fn sweep(state: &AppState, now: DateTime<Utc>) -> AppResult<SweepSummary> {
    let contexts = circulation::load_active_with_context(&state.db).await?;
    let mut summary = SweepSummary::default();

    for ctx in contexts {
        let outcome = match ctx.loan.status {
            LoanStatus::Booking => sweep_booking(state, &ctx, now, &mut summary).await,
            LoanStatus::OnLoan => sweep_on_loan(state, &ctx, now, &mut summary).await,
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            tracing::error!(loan_id = ctx.loan.id, "sweeping loan failed: {}", e);
        }
    }

    Ok(summary)
}

async fn sweep_booking(
    state: &AppState,
    ctx: &LoanContext,
    now: DateTime<Utc>,
    summary: &mut SweepSummary,
) -> AppResult<()> {
    let elapsed = now - ctx.loan.created_at;

    if elapsed >= Duration::minutes(BOOKING_EXPIRY_MINUTES) {
        if expire_booking(state, ctx, now).await? {
            summary.expired += 1;
        }
    } else if elapsed >= Duration::minutes(BOOKING_WARNING_MINUTES)
        && elapsed < Duration::minutes(BOOKING_WARNING_MINUTES + 1)
    {
        // Window-gated rather than recorded: with a one-minute window and a
        // one-minute sweep interval this fires roughly once.
        let message = format!(
            "Hi {}, your booking {} for \"{}\" expires in {} minutes. Please pick it up soon.",
            ctx.user.full_name,
            ctx.loan.booking_code,
            ctx.book.title,
            BOOKING_EXPIRY_MINUTES - BOOKING_WARNING_MINUTES
        );
        state.notifier.send(&ctx.student.phone, &message).await;
        state
            .events
            .publish(&user_topic(ctx.student.user_id), json!({ "message": message }));
        summary.warned += 1;
    }

    Ok(())
}

/// Cancel a booking whose pickup window has passed. Returns false when the
/// loan moved on in the meantime (picked up, cancelled by hand, or already
/// swept by an overlapping pass).
async fn expire_booking(state: &AppState, ctx: &LoanContext, now: DateTime<Utc>) -> AppResult<bool> {
    let txn = state.db.begin().await?;

    let target = match Loan::find_by_id(ctx.loan.id).one(&txn).await? {
        Some(l) if l.status == LoanStatus::Booking => l,
        _ => {
            txn.rollback().await?;
            return Ok(false);
        }
    };

    let mut active: loan::ActiveModel = target.into();
    active.status = Set(LoanStatus::Cancelled);
    active.returned_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(&txn).await?;

    let mut copy_active: copy::ActiveModel = ctx.copy.clone().into();
    copy_active.status = Set(CopyStatus::Available);
    copy_active.updated_at = Set(now);
    copy_active.update(&txn).await?;

    reconcile_book(&txn, ctx.copy.book_id).await?;
    txn.commit().await?;

    let message = format!(
        "Hi {}, your booking {} for \"{}\" was cancelled: the {} minute pickup window has passed.",
        ctx.user.full_name, ctx.loan.booking_code, ctx.book.title, BOOKING_EXPIRY_MINUTES
    );
    state.notifier.send(&ctx.student.phone, &message).await;
    state.events.publish(
        TOPIC_LOANS,
        json!({ "action": "booking_expired", "loan_id": ctx.loan.id }),
    );
    state
        .events
        .publish(&user_topic(ctx.student.user_id), json!({ "message": message }));

    Ok(true)
}

async fn sweep_on_loan(
    state: &AppState,
    ctx: &LoanContext,
    now: DateTime<Utc>,
    summary: &mut SweepSummary,
) -> AppResult<()> {
    if due_tomorrow(ctx.loan.due_at, now) && in_reminder_window(now) {
        let message = format!(
            "Hi {}, \"{}\" is due tomorrow ({}). Please return it on time.",
            ctx.user.full_name,
            ctx.book.title,
            ctx.loan.due_at.format("%Y-%m-%d")
        );
        state.notifier.send(&ctx.student.phone, &message).await;
        state
            .events
            .publish(&user_topic(ctx.student.user_id), json!({ "message": message }));
        summary.reminded += 1;
    }

    if now > ctx.loan.due_at {
        let fine = overdue_fine(ctx.loan.due_at, now);
        if fine != ctx.loan.fine && apply_fine(state, ctx, fine, now).await? {
            summary.fined += 1;
        }
    }

    Ok(())
}

fn due_tomorrow(due_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    due_at.date_naive() == now.date_naive() + Duration::days(1)
}

fn in_reminder_window(now: DateTime<Utc>) -> bool {
    now.hour() == REMINDER_HOUR && now.minute() == 0
}

/// Fine for an overdue loan: every started week of lateness charges one
/// weekly rate, so day 1 already costs a full week.
fn overdue_fine(due_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let days_late = (now - due_at).num_days();
    (days_late / 7 + 1) * circulation::WEEKLY_FINE
}

/// Store a recomputed fine. Returns false when the loan was returned or
/// re-fined in the meantime, in which case nothing is written or sent.
async fn apply_fine(
    state: &AppState,
    ctx: &LoanContext,
    fine: i64,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let txn = state.db.begin().await?;

    let target = match Loan::find_by_id(ctx.loan.id).one(&txn).await? {
        Some(l) if l.status == LoanStatus::OnLoan && l.fine != fine => l,
        _ => {
            txn.rollback().await?;
            return Ok(false);
        }
    };

    let mut active: loan::ActiveModel = target.into();
    active.fine = Set(fine);
    active.updated_at = Set(now);
    active.update(&txn).await?;
    txn.commit().await?;

    let days_late = (now - ctx.loan.due_at).num_days();
    let message = format!(
        "Hi {}, \"{}\" is {} day(s) overdue. Current fine: {}. Please return it as soon as possible.",
        ctx.user.full_name, ctx.book.title, days_late, fine
    );
    state.notifier.send(&ctx.student.phone, &message).await;
    state.events.publish(
        TOPIC_LOANS,
        json!({ "action": "fine_updated", "loan_id": ctx.loan.id, "fine": fine }),
    );
    state
        .events
        .publish(&user_topic(ctx.student.user_id), json!({ "message": message }));

    Ok(true)
}
