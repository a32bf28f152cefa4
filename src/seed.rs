use chrono::Utc;
use sea_orm::*;
use std::env;

use crate::auth::hash_password;
use crate::error::AppResult;
use crate::models::book::Entity as Book;
use crate::models::user::{self, Entity as User};
use crate::models::{Role, StudentStatus, student};
use crate::services::catalog::{self, BookInput, CategoryInput};
use crate::state::AppState;

/// Create the bootstrap admin account when none exists, so that
/// `/api/auth/register-admin` is reachable on a fresh database.
/// `ADMIN_EMAIL` / `ADMIN_PASSWORD` override the defaults.
pub async fn ensure_admin(db: &DatabaseConnection) -> AppResult<()> {
    let admins = User::find()
        .filter(user::Column::Role.eq(Role::Admin))
        .count(db)
        .await?;
    if admins > 0 {
        return Ok(());
    }

    let email = env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@bibliodesk.local".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin1234".to_string());

    let now = Utc::now();
    user::ActiveModel {
        full_name: Set("Administrator".to_string()),
        email: Set(email.clone()),
        password_hash: Set(hash_password(&password)?),
        role: Set(Role::Admin),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::warn!(email = %email, "bootstrap admin created; change its password after first login");
    Ok(())
}

/// Demo catalog and one ready-to-use student account, behind the
/// `SEED_DEMO` env flag. Books go through the catalog service so copies and
/// counters come out consistent.
pub async fn seed_demo_data(state: &AppState) -> AppResult<()> {
    if Book::find().count(&state.db).await? > 0 {
        tracing::info!("demo data already present, skipping seed");
        return Ok(());
    }

    let mut fiction_id = 0;
    let mut science_id = 0;
    for name in ["Fiction", "Science", "History"] {
        let saved = catalog::create_category(
            state,
            CategoryInput {
                name: name.to_string(),
            },
        )
        .await?;
        match name {
            "Fiction" => fiction_id = saved.id,
            "Science" => science_id = saved.id,
            _ => {}
        }
    }

    let demo_books = [
        (
            "Laskar Pelangi",
            "Andrea Hirata",
            "Bentang Pustaka",
            2005,
            "978-979-3062-79-2",
            85_000,
            fiction_id,
            3,
            "Ten schoolchildren and their two teachers keep a poor village school alive on Belitung island.",
        ),
        (
            "Bumi Manusia",
            "Pramoedya Ananta Toer",
            "Hasta Mitra",
            1980,
            "978-979-97312-3-2",
            98_000,
            fiction_id,
            2,
            "A Javanese student comes of age under colonial rule and learns what the law is worth.",
        ),
        (
            "A Brief History of Time",
            "Stephen Hawking",
            "Bantam Books",
            1988,
            "978-0-553-38016-3",
            120_000,
            science_id,
            2,
            "From the big bang to black holes: cosmology for readers without equations.",
        ),
    ];

    for (title, author, publisher, year, isbn, price, category_id, copies, description) in demo_books
    {
        catalog::create_book(
            state,
            BookInput {
                title: title.to_string(),
                author: author.to_string(),
                publisher: Some(publisher.to_string()),
                year_published: Some(year),
                isbn: isbn.to_string(),
                price: Some(price),
                description: Some(description.to_string()),
                cover: None,
                category_id,
                total_copies: copies,
            },
        )
        .await?;
    }

    let now = Utc::now();
    let account = user::ActiveModel {
        full_name: Set("Siti Rahma".to_string()),
        email: Set("siti@student.bibliodesk.local".to_string()),
        password_hash: Set(hash_password("student123")?),
        role: Set(Role::Student),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    student::ActiveModel {
        user_id: Set(account.id),
        student_number: Set("2024-001".to_string()),
        class_name: Set("XI-A".to_string()),
        phone: Set("081234567890".to_string()),
        address: Set("Jl. Pendidikan 14, Tanjong Pandan".to_string()),
        status: Set(StudentStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    tracing::info!("demo data seeded");
    Ok(())
}
