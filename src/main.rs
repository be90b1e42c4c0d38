//! Charging network demo
//!
//! Builds a small site, feeds it charge point statuses, prints the status
//! reports and routes one roaming session through two local backends.
//! Reads configuration from TOML file (~/.config/charging-network/config.toml).

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use charging_network::application::roaming::{
    AuthorizeStartRequest, AuthorizeStopRequest, ChargeDetailRecord, LocalBackend, RouterSettings,
};
use charging_network::application::{create_event_bus, AffinityRouter, ChargingNetwork};
use charging_network::config::{config_path_from_env, AppConfig};
use charging_network::domain::{
    flatten, AdminStatus, ChargingStatus, EntityKind, TimelineSettings, WriteMode,
};
use charging_network::shared::system_clock;

fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = config_path_from_env();
    let app_cfg = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_tracing(&cfg);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            let cfg = AppConfig::default();
            init_tracing(&cfg);
            error!("Failed to load config: {}. Using defaults.", e);
            cfg
        }
    };

    // ── Prometheus metrics recorder (before any metrics calls) ──
    let prometheus_handle = match metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let clock = system_clock();
    let event_bus = create_event_bus(app_cfg.events.capacity);

    // ── Event consumer ─────────────────────────────────────────
    let mut subscriber = event_bus.subscribe();
    let consumer = tokio::spawn(async move {
        let mut received = 0usize;
        while let Some(message) = subscriber.recv().await {
            received += 1;
            debug!(
                event_type = message.event.event_type(),
                entity_id = ?message.event.entity_id(),
                "Event received"
            );
        }
        received
    });

    // ── Network ────────────────────────────────────────────────
    let settings = TimelineSettings::from(&app_cfg.timeline);
    let network = ChargingNetwork::<String>::new(settings, clock.clone())
        .with_event_bus(event_bus.clone())
        .shared();

    network.add_entity(
        "SITE-1".to_string(),
        EntityKind::Site,
        ChargingStatus::Unknown,
        AdminStatus::Operational,
    )?;
    for station in ["ST-1", "ST-2"] {
        network.add_entity(
            station.to_string(),
            EntityKind::Station,
            ChargingStatus::Unknown,
            AdminStatus::Operational,
        )?;
        network.attach(&"SITE-1".to_string(), &station.to_string())?;
    }

    let charge_points = [
        ("CP-1", "ST-1", ChargingStatus::Charging),
        ("CP-2", "ST-1", ChargingStatus::Charging),
        ("CP-3", "ST-1", ChargingStatus::Available),
        ("CP-4", "ST-2", ChargingStatus::Faulted),
        ("CP-5", "ST-2", ChargingStatus::Available),
    ];
    for (id, station, _) in &charge_points {
        network.add_entity(
            id.to_string(),
            EntityKind::ChargePoint,
            ChargingStatus::Available,
            AdminStatus::Operational,
        )?;
        network.attach(&station.to_string(), &id.to_string())?;
    }
    for (id, _, status) in &charge_points {
        network
            .entity(&id.to_string())?
            .set_status(*status, WriteMode::Replace)?;
    }
    network
        .entity(&"CP-4".to_string())?
        .set_admin_status(AdminStatus::OutOfService, WriteMode::Replace)?;

    let site = network.entity(&"SITE-1".to_string())?;
    info!(
        site_status = %site.current_status()?.value,
        site_admin_status = %site.current_admin_status()?.value,
        "Network built"
    );

    for kind in [EntityKind::ChargePoint, EntityKind::Station] {
        let report = network.status_report(kind);
        info!(%kind, "{}", report);
        println!("{}", serde_json::to_string_pretty(&report)?);
        let admin = network.admin_status_report(kind);
        println!("{}", serde_json::to_string_pretty(&admin)?);
    }

    // ── Roaming ────────────────────────────────────────────────
    let primary = Arc::new(LocalBackend::new("hub-primary"));
    let fallback = Arc::new(LocalBackend::new("hub-fallback"));
    primary.block_token("04A1B2C3");
    fallback.accept_token("04A1B2C3");
    fallback.accept_token("04D4E5F6");

    let router = AffinityRouter::new(RouterSettings::from(&app_cfg.router), clock.clone())
        .with_event_bus(event_bus.clone());
    router.register_backend(1, primary.clone());
    router.register_backend(2, fallback.clone());

    let blocked = router
        .authorize_start(&AuthorizeStartRequest {
            token: "04A1B2C3".to_string(),
            charge_point_id: Some("CP-1".to_string()),
            session_id: None,
        })
        .await;
    info!(status = %blocked.status, "Blocked token rejected");

    let started_at = Utc::now();
    let authorized = router
        .authorize_start(&AuthorizeStartRequest {
            token: "04D4E5F6".to_string(),
            charge_point_id: Some("CP-2".to_string()),
            session_id: None,
        })
        .await;

    let mut records = Vec::new();
    if let Some(session_id) = authorized.session_id.clone() {
        let stopped = router
            .authorize_stop(&AuthorizeStopRequest {
                session_id: session_id.clone(),
                token: "04D4E5F6".to_string(),
                charge_point_id: Some("CP-2".to_string()),
            })
            .await;
        info!(status = %stopped.status, %session_id, "Stop authorized");

        records.push(
            router
                .send_charge_detail_record(&ChargeDetailRecord {
                    session_id,
                    token: "04D4E5F6".to_string(),
                    charge_point_id: "CP-2".to_string(),
                    started_at,
                    stopped_at: Utc::now(),
                    energy_wh: 11_500,
                })
                .await,
        );
    } else {
        warn!(status = %authorized.status, "Session was not authorized");
    }

    let verdict = flatten(&records, std::time::Duration::ZERO);
    info!(%verdict, "Charge detail records delivered");

    // ── Shutdown ───────────────────────────────────────────────
    drop(router);
    drop(site);
    drop(network);
    drop(event_bus);
    match consumer.await {
        Ok(received) => info!(received, "Event consumer finished"),
        Err(e) => error!("Event consumer failed: {}", e),
    }

    if let Some(handle) = prometheus_handle {
        debug!(metrics = %handle.render(), "Final metrics");
    }

    Ok(())
}
