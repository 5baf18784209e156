use skill_up::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    mailer::{MailerState, SmtpMailer},
    payments::{PaymentsState, StripeClient},
    repository::{PostgresRepository, RepositoryState},
    storage::{S3StorageClient, StorageService, StorageState},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Pretty output locally, JSON lines in production. `RUST_LOG` overrides the level.
fn init_tracing(env: Env) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "skill_up=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match env {
        Env::Local => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        Env::Production => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn connect_database(config: &AppConfig) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");
    tracing::info!("database ready, migrations applied");

    pool
}

/// Wires the production services: Postgres, S3/MinIO, SMTP and Stripe.
async fn build_state(config: AppConfig) -> AppState {
    let repo = Arc::new(PostgresRepository::new(connect_database(&config).await)) as RepositoryState;

    let s3 = S3StorageClient::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.s3_bucket,
    )
    .await;
    // MinIO in docker starts empty.
    if config.env == Env::Local {
        s3.ensure_bucket_exists().await;
    }

    let mailer =
        Arc::new(SmtpMailer::from_config(&config).expect("FATAL: Invalid SMTP configuration."))
            as MailerState;
    let payments = Arc::new(StripeClient::new(
        &config.stripe_secret_key,
        &config.stripe_webhook_secret,
    )) as PaymentsState;

    AppState {
        repo,
        storage: Arc::new(s3) as StorageState,
        mailer,
        payments,
        config,
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = AppConfig::load();
    init_tracing(config.env);
    tracing::info!(env = ?config.env, "skill-up api starting");

    let bind_addr = config.bind_addr.clone();
    let app = create_router(build_state(config).await);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");
    tracing::info!(%bind_addr, "listening; Swagger UI at /swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}
