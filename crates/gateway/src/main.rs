use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use gateway_channels::{ChannelConfigStore, ChannelManager, ChannelRegistry};
use gateway_commands::CommandProcessor;
use gateway_core::config::GatewayConfig;
use gateway_discord::DiscordAdapter;
use gateway_email::{CursorStore, EmailChannelAdapter, EmailPoller, ImapSmtpProvider};
use gateway_middleware::{
    AuditMiddleware, AuditStore, DedupeMiddleware, DedupeStore, PolicyEnforcer, RateLimitMiddleware,
    RateLimitStore, RemoteExposureDetector, SecurityMode as PolicySecurityMode, SecurityPolicy,
};
use gateway_sessions::SessionStore;
use gateway_slack::SlackAdapter;
use gateway_sms::SmsAdapter;
use gateway_telegram::TelegramAdapter;
use gateway_whatsapp::WhatsAppAdapter;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod http;
mod manifests;

/// Opens a connection to the shared sqlite file, creating its parent
/// directory on first run. Every store keeps its own connection — WAL
/// mode lets them coexist as concurrent readers behind one writer each.
fn open_store_db(path: &str) -> anyhow::Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn chat_only_policy(rate_limit_per_minute: i64) -> SecurityPolicy {
    SecurityPolicy::new(
        PolicySecurityMode::ChatOnly,
        false,
        Vec::new(),
        false,
        None,
        vec![gateway_middleware::OperationType::Chat],
        rate_limit_per_minute,
        true,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("GATEWAY_CONFIG").ok();
    let config = GatewayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        GatewayConfig::default()
    });

    if let Some(exposure_warning) = RemoteExposureDetector::get_exposure_warning() {
        warn!("{exposure_warning}");
    }

    let db_path = config.database.path.clone();
    let dedupe_store = DedupeStore::new(open_store_db(&db_path)?)?;
    let rate_limit_store = RateLimitStore::new(open_store_db(&db_path)?)?;
    let audit_store = AuditStore::new(open_store_db(&db_path)?)?;
    let policy_audit_store = AuditStore::new(open_store_db(&db_path)?)?;
    let session_store = SessionStore::new(open_store_db(&db_path)?)?;
    let config_store = ChannelConfigStore::new(open_store_db(&db_path)?)?;

    let registry = ChannelRegistry::new();
    let mut channel_manager = ChannelManager::new();
    let policy = PolicyEnforcer::new(Some(policy_audit_store));

    let mut whatsapp_adapter = None;
    if let Some(cfg) = &config.channels.whatsapp_twilio {
        registry.register_manifest(manifests::whatsapp_twilio_manifest(&cfg.channel_id));
        policy.set_channel_policy(&cfg.channel_id, chat_only_policy(config.middleware.rate_limit_max_requests));
        let adapter = Arc::new(WhatsAppAdapter::new(cfg.clone()));
        channel_manager.register(adapter.clone());
        whatsapp_adapter = Some(adapter);
    }

    let mut telegram_adapter = None;
    if let Some(cfg) = &config.channels.telegram {
        registry.register_manifest(manifests::telegram_manifest(&cfg.channel_id));
        policy.set_channel_policy(&cfg.channel_id, chat_only_policy(config.middleware.rate_limit_max_requests));
        let adapter = Arc::new(TelegramAdapter::new(cfg.clone()));
        channel_manager.register(adapter.clone());
        telegram_adapter = Some(adapter);
    }

    let mut slack_adapter = None;
    if let Some(cfg) = &config.channels.slack {
        registry.register_manifest(manifests::slack_manifest(&cfg.channel_id));
        policy.set_channel_policy(&cfg.channel_id, chat_only_policy(config.middleware.rate_limit_max_requests));
        let adapter = Arc::new(SlackAdapter::new(cfg.clone()));
        channel_manager.register(adapter.clone());
        slack_adapter = Some(adapter);
    }

    let mut discord_adapter = None;
    if let Some(cfg) = &config.channels.discord {
        registry.register_manifest(manifests::discord_manifest(&cfg.channel_id));
        policy.set_channel_policy(&cfg.channel_id, chat_only_policy(config.middleware.rate_limit_max_requests));
        let adapter = Arc::new(DiscordAdapter::new(cfg.clone()));
        channel_manager.register(adapter.clone());
        discord_adapter = Some(adapter);
    }

    let mut sms_adapters: HashMap<String, Arc<SmsAdapter>> = HashMap::new();
    if let Some(cfg) = &config.channels.sms_twilio {
        registry.register_manifest(manifests::sms_twilio_manifest(&cfg.channel_id));
        policy.set_channel_policy(&cfg.channel_id, chat_only_policy(config.middleware.rate_limit_max_requests));
        let adapter = Arc::new(SmsAdapter::new(cfg.clone()));
        channel_manager.register(adapter.clone());
        sms_adapters.insert(adapter.path_token().to_string(), adapter);
    }

    let mut email_pollers = Vec::new();
    for cfg in &config.channels.email {
        registry.register_manifest(manifests::email_manifest(&cfg.channel_id));
        policy.set_channel_policy(&cfg.channel_id, chat_only_policy(config.middleware.rate_limit_max_requests));

        let provider = Arc::new(ImapSmtpProvider::new(
            cfg.imap_host.clone(),
            cfg.imap_port,
            cfg.smtp_host.clone(),
            cfg.smtp_port,
            cfg.username.clone(),
            cfg.password.clone(),
        ));
        channel_manager.register(Arc::new(EmailChannelAdapter::new(cfg.channel_id.clone(), provider.clone())));

        let cursor_store = CursorStore::new(open_store_db(&db_path)?)?;
        email_pollers.push((cfg.channel_id.clone(), provider, cursor_store, cfg.poll_interval_secs));
    }

    let mut bus = gateway_bus::MessageBus::new(channel_manager);
    bus.add_middleware(Arc::new(DedupeMiddleware::new(dedupe_store, config.middleware.dedupe_ttl_ms)));
    bus.add_middleware(Arc::new(RateLimitMiddleware::new(
        rate_limit_store,
        config.middleware.rate_limit_window_ms,
        config.middleware.rate_limit_max_requests,
    )));
    bus.add_middleware(Arc::new(AuditMiddleware::new(audit_store, config.middleware.audit_retention_days)));
    let middleware_count = 3;
    let bus = Arc::new(bus);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    for (channel_id, provider, cursor_store, poll_interval_secs) in email_pollers {
        let poller = EmailPoller::new(channel_id, provider, bus.clone(), cursor_store, poll_interval_secs);
        let rx = shutdown_rx.clone();
        tokio::spawn(poller.run(rx));
    }

    let commands = CommandProcessor::new(session_store);

    let state = Arc::new(app::AppState {
        config: config.clone(),
        registry,
        config_store,
        bus,
        commands,
        policy,
        whatsapp: whatsapp_adapter,
        telegram: telegram_adapter,
        slack: slack_adapter,
        discord: discord_adapter,
        sms: sms_adapters,
        middleware_count,
    });

    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    info!(%addr, "gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
