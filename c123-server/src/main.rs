use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use c123_contracts::{Envelope, EventSnapshot};
use c123_decode::{DecodedRecord, decode_frame};
use c123_protocol::{
    DEFAULT_CONFIG_LOCATOR_INTERVAL, DEFAULT_DEBOUNCE_MS, DEFAULT_HTTP_PORT, DEFAULT_POLL_INTERVAL,
    DEFAULT_UDP_PORT,
};
use c123_server::aggregator::EventState;
use c123_server::api;
use c123_server::api::state::{AppState, SourceStatuses};
use c123_server::change_detector::ChangeDetector;
use c123_server::config_locator::{ConfigLocator, DetectionOutcome, LocatorMode, resolve_path};
use c123_server::hub::SubscriberHub;
use c123_server::log_ring::LogRing;
use c123_server::publisher::{ExternalPublisher, PublishEvent};
use c123_server::registry::ClientRegistry;
use c123_server::settings::SettingsStore;
use c123_server::sources::SourceStatus;
use c123_server::sources::file_watcher::{FileEvent, FileWatcher, WatchMode};
use c123_server::sources::tcp::TcpSource;
use c123_server::sources::udp::{DiscoveryState, UdpAnnouncer};
use c123_server::sources::xml_file_source::XmlFileSource;
use c123_server::xml_database::XmlDatabase;
use clap::Parser;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "c123-server")]
#[command(about = "Live-timing fan-out gateway for the Canoe123 timing engine")]
struct Args {
    /// HTTP/WebSocket listen port.
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Timing engine TCP host.
    #[arg(long, default_value = "localhost")]
    tcp_host: String,

    /// Timing engine TCP port.
    #[arg(long, default_value_t = DEFAULT_UDP_PORT)]
    tcp_port: u16,

    /// Listen for the engine's UDP announce broadcast and latch its host.
    #[arg(long)]
    auto_discovery: bool,

    /// `FileWatcher` polling interval in seconds, used when `--watch-mode polling`.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval_secs: u64,

    /// `FileWatcher` strategy: `native` or `polling`.
    #[arg(long, default_value = "native")]
    watch_mode: String,

    /// Debounce window collapsing a flurry of file-change events into one.
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE_MS)]
    debounce_ms: u64,

    /// Directory under which the engine's own settings folders are searched.
    #[arg(long, default_value = ".")]
    settings_root: PathBuf,

    /// `ConfigLocator` mode: `auto-offline`, `auto-main`, or `manual`.
    #[arg(long, default_value = "auto-offline")]
    locator_mode: String,

    /// How often `ConfigLocator` re-runs detection.
    #[arg(long, default_value_t = DEFAULT_CONFIG_LOCATOR_INTERVAL.as_secs())]
    locator_interval_secs: u64,

    /// Manual override for the shared XML database file path (also used as
    /// the resolved path in `manual` locator mode).
    #[arg(long)]
    xml_path: Option<PathBuf>,

    /// Path to the persisted client-config/settings document.
    #[arg(long)]
    settings_path: Option<PathBuf>,

    /// Base URL of the external publisher sink. Omit to disable forwarding.
    #[arg(long)]
    external_publish_url: Option<String>,
}

fn parse_locator_mode(s: &str) -> LocatorMode {
    match s {
        "auto-main" => LocatorMode::AutoMain,
        "manual" => LocatorMode::Manual,
        _ => LocatorMode::AutoOffline,
    }
}

fn parse_watch_mode(s: &str) -> WatchMode {
    match s {
        "polling" => WatchMode::Polling,
        _ => WatchMode::Native,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_ring = LogRing::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(log_ring.clone())
        .init();

    let args = Args::parse();
    let started_at = chrono::Utc::now();

    let settings_path = args.settings_path.clone().unwrap_or_else(c123_server::settings::default_settings_path);
    let settings = Arc::new(SettingsStore::load(settings_path).await);
    let hub = Arc::new(SubscriberHub::new());
    log_ring.attach_hub(hub.clone());
    let registry = Arc::new(ClientRegistry::new(settings.clone(), hub.clone()));

    let locator = Arc::new(ConfigLocator::new(args.settings_root.clone()));
    let initial_mode = parse_locator_mode(&args.locator_mode);
    let initial_outcome = locator.detect();
    let initial_resolved = resolve_path(initial_mode, &initial_outcome, args.xml_path.as_deref());

    let xml_db_path = initial_resolved.clone().or_else(|| args.xml_path.clone()).unwrap_or_else(|| PathBuf::from("canoe123-data.xml"));
    let xml_db = Arc::new(XmlDatabase::new(xml_db_path));

    let (locator_mode_tx, locator_mode_rx) = watch::channel(initial_mode);
    let (locator_manual_tx, locator_manual_rx) = watch::channel(args.xml_path.clone());
    let (locator_result_tx, locator_result_rx) = watch::channel(initial_outcome);

    {
        let locator = locator.clone();
        let mode_rx = locator_mode_rx.clone();
        let manual_rx = locator_manual_rx.clone();
        let result_tx = locator_result_tx.clone();
        let interval = Duration::from_secs(args.locator_interval_secs);
        tokio::spawn(async move {
            locator.run(interval, mode_rx, manual_rx, result_tx).await;
        });
    }

    let (frame_tx, frame_rx) = mpsc::channel::<String>(256);

    let (tcp_status_tx, tcp_status_rx) = watch::channel(SourceStatus::Disconnected);
    {
        let tcp_source = TcpSource::new(args.tcp_host.clone(), args.tcp_port);
        let frame_tx = frame_tx.clone();
        tokio::spawn(async move {
            tcp_source.run(frame_tx, tcp_status_tx).await;
        });
    }

    let (udp_state_tx, udp_state_rx) = watch::channel(DiscoveryState::Waiting);
    if args.auto_discovery {
        let announcer = UdpAnnouncer::default_port();
        let (message_tx, mut message_rx) = mpsc::channel(256);
        let (discovery_tx, _discovery_rx) = watch::channel(None::<SocketAddr>);
        let frame_tx = frame_tx.clone();
        tokio::spawn(async move {
            while let Some((frame, _addr)) = message_rx.recv().await {
                let _ = frame_tx.send(frame).await;
            }
        });
        tokio::spawn(async move {
            if let Err(e) = announcer.run(message_tx, discovery_tx, udp_state_tx).await {
                warn!(error = %e, "udp announcer exited");
            }
        });
    }

    let (xml_status_tx, xml_status_rx) = watch::channel(SourceStatus::Disconnected);

    let publish_tx = args.external_publish_url.as_ref().map(|url| {
        let (tx, rx) = mpsc::channel::<PublishEvent>(256);
        let publisher = ExternalPublisher::new(url.clone());
        tokio::spawn(async move {
            publisher.run(rx).await;
        });
        tx
    });

    let change_detector = Arc::new(Mutex::new(ChangeDetector::new()));
    let supervisor_cancel = c123_server::cancel::CancelToken::new();
    {
        let watch_mode = parse_watch_mode(&args.watch_mode);
        let poll_interval = Duration::from_secs(args.poll_interval_secs);
        let debounce = Duration::from_millis(args.debounce_ms);
        let frame_tx = frame_tx.clone();
        let hub = hub.clone();
        let publish_tx = publish_tx.clone();
        let mode_rx = locator_mode_rx.clone();
        let manual_rx = locator_manual_rx.clone();
        let result_rx = locator_result_rx.clone();
        let cancel = supervisor_cancel.clone();
        tokio::spawn(run_xml_pipeline_supervisor(
            mode_rx,
            manual_rx,
            result_rx,
            watch_mode,
            poll_interval,
            debounce,
            frame_tx,
            xml_status_tx,
            change_detector,
            hub,
            publish_tx,
            cancel,
        ));
    }

    let (change_tx, _change_rx) = broadcast::channel::<Arc<EventSnapshot>>(256);
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(EventSnapshot::default()));
    {
        let mut change_rx = change_tx.subscribe();
        tokio::spawn(async move {
            while let Ok(snapshot) = change_rx.recv().await {
                let _ = snapshot_tx.send(snapshot);
            }
        });
    }

    {
        let mut frame_rx = frame_rx;
        let hub = hub.clone();
        let publish_tx = publish_tx.clone();
        let mut aggregator = EventState::new(change_tx);
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let records = match decode_frame(&frame) {
                    Ok(records) => records,
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable frame");
                        continue;
                    }
                };

                for record in records {
                    publish_and_broadcast(&hub, publish_tx.as_ref(), &record).await;
                    aggregator.apply(record);
                }
            }
        });
    }

    let event_name_default = "Canoe123 Event".to_string();
    let shutdown_locator = locator.clone();
    let state = AppState {
        hub,
        registry,
        settings,
        xml_db,
        snapshot_rx,
        sources: SourceStatuses {
            tcp: tcp_status_rx,
            udp: udp_state_rx,
            xml_file: xml_status_rx,
        },
        locator,
        locator_rx: locator_result_rx,
        locator_mode_tx,
        locator_manual_tx,
        log_ring,
        started_at,
        port: args.port,
        event_name_default,
    };

    let app = api::router(state);
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(port = args.port, "c123-server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("stopping background components");
    supervisor_cancel.cancel();
    shutdown_locator.stop();

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Pushes one decoded record to subscribers and the external publisher
/// (§4.6) before it is folded into the aggregator's snapshot.
async fn publish_and_broadcast(
    hub: &SubscriberHub,
    publish_tx: Option<&mpsc::Sender<PublishEvent>>,
    record: &DecodedRecord,
) {
    match record {
        DecodedRecord::TimeOfDay(time) => {
            hub.broadcast(Envelope::time_of_day(time.clone()));
            if let Some(tx) = publish_tx {
                let _ = tx
                    .send(PublishEvent::XmlChange {
                        sections: vec!["TimeOfDay".to_string()],
                        checksum: time.clone().unwrap_or_default(),
                    })
                    .await;
            }
        }
        DecodedRecord::RaceConfig(config) => {
            hub.broadcast(Envelope::race_config(config));
            if let Some(tx) = publish_tx {
                let _ = tx
                    .send(PublishEvent::XmlChange {
                        sections: vec!["RaceConfig".to_string()],
                        checksum: serde_json::to_string(config).unwrap_or_default(),
                    })
                    .await;
            }
        }
        DecodedRecord::Schedule(schedule) => {
            hub.broadcast(Envelope::schedule(schedule));
            if let Some(tx) = publish_tx {
                let _ = tx
                    .send(PublishEvent::XmlChange {
                        sections: vec!["Schedule".to_string()],
                        checksum: serde_json::to_string(schedule).unwrap_or_default(),
                    })
                    .await;
            }
        }
        DecodedRecord::OnCourse(payload) => {
            hub.broadcast(Envelope::on_course(&payload.competitors));
            if let Some(tx) = publish_tx {
                let _ = tx
                    .send(PublishEvent::OnCourse {
                        payload: serde_json::json!({ "competitors": payload.competitors }),
                    })
                    .await;
            }
        }
        DecodedRecord::Results(results) => {
            hub.broadcast(Envelope::results(results));
            if let Some(tx) = publish_tx {
                let _ = tx
                    .send(PublishEvent::Results {
                        race_id: results.race_id.clone(),
                        payload: serde_json::to_value(results).unwrap_or_default(),
                    })
                    .await;
            }
        }
        DecodedRecord::Unknown { .. } => {}
    }
}

/// Restarts `FileWatcher`/`XmlFileSource`/the change-detector consumer
/// whenever `ConfigLocator`'s resolved path changes (C10 → C5, §4.8), per
/// C4 feeding both C5 (live-frame decode) and C9 (section-tagged change
/// notification) from the same watched file (spec data flow: `C4 → C5`
/// and `C4 → C9 → C11`).
#[allow(clippy::too_many_arguments)]
async fn run_xml_pipeline_supervisor(
    mut mode_rx: watch::Receiver<LocatorMode>,
    mut manual_rx: watch::Receiver<Option<PathBuf>>,
    mut result_rx: watch::Receiver<DetectionOutcome>,
    watch_mode: WatchMode,
    poll_interval: Duration,
    debounce: Duration,
    frame_tx: mpsc::Sender<String>,
    status_tx: watch::Sender<SourceStatus>,
    change_detector: Arc<Mutex<ChangeDetector>>,
    hub: Arc<SubscriberHub>,
    publish_tx: Option<mpsc::Sender<PublishEvent>>,
    supervisor_cancel: c123_server::cancel::CancelToken,
) {
    let mut current: Option<(PathBuf, c123_server::cancel::CancelToken, c123_server::cancel::CancelToken)> = None;

    loop {
        let mode = *mode_rx.borrow();
        let manual = manual_rx.borrow().clone();
        let outcome = result_rx.borrow().clone();
        let resolved = resolve_path(mode, &outcome, manual.as_deref());

        let path_changed = match &current {
            Some((path, _, _)) => Some(path) != resolved.as_ref(),
            None => resolved.is_some(),
        };

        if path_changed {
            if let Some((_, fw_token, xfs_token)) = current.take() {
                fw_token.cancel();
                xfs_token.cancel();
            }

            if let Some(path) = resolved {
                info!(path = %path.display(), "xml pipeline: switching watched file");

                let (fw_tx, mut fw_rx) = mpsc::channel::<FileEvent>(16);
                let (xfs_events_tx, xfs_events_rx) = mpsc::channel::<FileEvent>(16);
                let (cd_events_tx, mut cd_events_rx) = mpsc::channel::<FileEvent>(16);

                let watcher = FileWatcher::new(path.clone(), watch_mode, poll_interval, debounce);
                let fw_token = watcher.cancel_token();
                tokio::spawn(async move {
                    watcher.run(fw_tx).await;
                });

                tokio::spawn(async move {
                    while let Some(event) = fw_rx.recv().await {
                        if xfs_events_tx.send(event.clone()).await.is_err() {
                            break;
                        }
                        if cd_events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                });

                let xfs = XmlFileSource::new(path.clone());
                let xfs_token = xfs.cancel_token();
                let xfs_frame_tx = frame_tx.clone();
                let xfs_status_tx = status_tx.clone();
                tokio::spawn(async move {
                    xfs.run(xfs_events_rx, xfs_frame_tx, xfs_status_tx).await;
                });

                let cd_path = path.clone();
                let cd = change_detector.clone();
                let cd_hub = hub.clone();
                let cd_publish_tx = publish_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = cd_events_rx.recv().await {
                        if !matches!(event, FileEvent::Ready | FileEvent::Changed) {
                            continue;
                        }
                        let Ok(content) = tokio::fs::read_to_string(&cd_path).await else {
                            continue;
                        };
                        let change = {
                            let mut guard = cd.lock().await;
                            guard.observe(&content)
                        };
                        if let Some(change) = change {
                            cd_hub.broadcast_xml_change(&change.sections, &change.checksum);
                            if let Some(tx) = &cd_publish_tx {
                                let _ = tx
                                    .send(PublishEvent::XmlChange {
                                        sections: change.sections.clone(),
                                        checksum: change.checksum.clone(),
                                    })
                                    .await;
                            }
                        }
                    }
                });

                current = Some((path, fw_token, xfs_token));
            } else {
                let _ = status_tx.send(SourceStatus::Disconnected);
            }
        }

        tokio::select! {
            _ = mode_rx.changed() => {}
            _ = manual_rx.changed() => {}
            _ = result_rx.changed() => {}
            _ = supervisor_cancel.cancelled() => return,
        }
    }
}
