//! Seed the admin account. There is no public registration endpoint; this
//! binary is the only way user accounts come into existence.
//!
//! Usage: set ADMIN_EMAIL, ADMIN_PASSWORD (and optionally ADMIN_NAME) in the
//! environment or .env, then `cargo run --bin seed-admin`.

use bcrypt::{hash, DEFAULT_COST};
use std::env;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let email = env::var("ADMIN_EMAIL").unwrap_or_else(|_| {
        eprintln!("ADMIN_EMAIL must be set");
        std::process::exit(1);
    });
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| {
        eprintln!("ADMIN_PASSWORD must be set");
        std::process::exit(1);
    });
    let name = env::var("ADMIN_NAME").unwrap_or_else(|_| "Admin".to_string());

    if !email.contains('@') {
        eprintln!("ADMIN_EMAIL does not look like an email address: {}", email);
        std::process::exit(1);
    }
    if password.len() < 8 {
        eprintln!("ADMIN_PASSWORD must be at least 8 characters long");
        std::process::exit(1);
    }

    let pool = match portfolio_api::db::init_pool(None).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = portfolio_api::db::run_migrations(&pool).await {
        eprintln!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    let exists: bool =
        match sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))")
            .bind(&email)
            .fetch_one(pool.as_ref())
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                eprintln!("Failed to check existing users: {}", e);
                std::process::exit(1);
            }
        };

    if exists {
        println!("User {} already exists; nothing to do.", email);
        return;
    }

    let password_hash = match hash(&password, DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to hash password: {}", e);
            std::process::exit(1);
        }
    };

    match sqlx::query(
        "INSERT INTO users (email, password_hash, name, role) VALUES ($1, $2, $3, 'admin')",
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(&name)
    .execute(pool.as_ref())
    .await
    {
        Ok(_) => println!("Seeded admin user {}", email),
        Err(e) => {
            eprintln!("Failed to seed admin user: {}", e);
            std::process::exit(1);
        }
    }
}
