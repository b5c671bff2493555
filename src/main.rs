use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subdesk::calendar::{
    CalendarConfig, CalendarGateway, GoogleCalendarClient, NoopCalendarGateway,
};
use subdesk::chat::{ChatGateway, DiscordConfig, DiscordHttpClient, NoopChatGateway};
use subdesk::db::repository;
use subdesk::routes::router;
use subdesk::services::{BoardReconciler, CalendarSync, EscalationScheduler, SubService};
use subdesk::state::AppState;

const ESCALATION_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "subdesk=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://subdesk.db".to_string());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let chat: Arc<dyn ChatGateway> = match DiscordConfig::new_from_env() {
        Ok(config) => Arc::new(DiscordHttpClient::new(config)?),
        Err(_) => {
            info!("DISCORD_TOKEN not set, chat notifications disabled");
            Arc::new(NoopChatGateway)
        }
    };

    let calendar: Arc<dyn CalendarGateway> =
        match repository::get_config(&pool, repository::CONFIG_CALENDAR_CREDENTIALS).await? {
            Some(credentials) => {
                Arc::new(GoogleCalendarClient::new(CalendarConfig::from_parts(&credentials)?)?)
            }
            None => {
                info!("calendar credentials not configured, calendar sync disabled");
                Arc::new(NoopCalendarGateway)
            }
        };

    let board = Arc::new(BoardReconciler::new(pool.clone(), Arc::clone(&chat)));
    let subs = Arc::new(SubService::new(
        pool.clone(),
        Arc::clone(&chat),
        Arc::clone(&board),
    ));
    let calendar_sync = Arc::new(CalendarSync::new(pool.clone(), calendar));

    let scheduler = EscalationScheduler::new(Arc::clone(&subs), ESCALATION_INTERVAL_SECS);
    tokio::spawn(scheduler.start());

    // Bring the board in line with whatever the store holds after a restart.
    board.trigger();

    let state = AppState {
        db: pool.clone(),
        subs,
        board,
        calendar_sync,
    };

    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
