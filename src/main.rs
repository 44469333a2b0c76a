use axum::{routing::get, Router};
use chrono::Utc;
use std::env;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use courseloom::config::Config;
use courseloom::models::{Role, User};
use courseloom::store::Store;
use courseloom::{auth, db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "courseloom=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::connect(&config.database_url).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = Store::postgres(pool);
    seed_admin(&store, &config).await?;

    let state = AppState {
        store,
        auth: config.auth.clone(),
    };
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Create the admin account from ADMIN_EMAIL/ADMIN_PASSWORD when it does not
/// exist yet. No-op unless both variables are set.
async fn seed_admin(store: &Store, config: &Config) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };
    if store.users.user_by_email(email).await?.is_some() {
        return Ok(());
    }

    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        name: "Admin".into(),
        email: email.clone(),
        password_hash: auth::hash_password(password)?,
        role: Role::Admin,
        created_at: now,
        updated_at: now,
    };
    store.users.insert_user(&admin).await?;
    tracing::info!(user_id = %admin.id, "seeded admin account");
    Ok(())
}
