// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use nan_core::callbacks::DataPathManager;
use nan_core::config::Config;
use nan_core::dispatcher::{Dispatcher, EventSender};
use nan_core::error::ReasonCode;
use nan_core::hal::{HalAdapter, HalCall};
use nan_core::ids::{MacAddr, PubSubId};
use nan_core::manager::NanStateManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Stand-in for the vendor HAL binding (spec §4.7, "out of scope"): logs
/// every call it's asked to submit instead of talking to firmware. A real
/// deployment swaps this for whatever binds to the platform's NAN vendor
/// HAL and answers back through the same `EventSender`.
struct LoggingHal {
    #[allow(dead_code)]
    events: EventSender,
}

impl HalAdapter for LoggingHal {
    fn submit(&self, call: HalCall) -> anyhow::Result<()> {
        debug!(?call, "hal: submit (no vendor binding wired up, no response will follow)");
        Ok(())
    }
}

/// Stand-in for the data-path lifecycle manager (spec §6, "out of scope").
struct LoggingDataPathManager;

impl DataPathManager for LoggingDataPathManager {
    fn create_all_data_path_interfaces(&self) {
        info!("datapath: create_all_data_path_interfaces");
    }

    fn delete_all_data_path_interfaces(&self) {
        info!("datapath: delete_all_data_path_interfaces");
    }

    fn handle_data_path_request(&self, pub_sub_id: PubSubId, peer_mac: MacAddr, ndp_id: u32, app_info: Vec<u8>) {
        info!(pub_sub_id = pub_sub_id.0, %peer_mac, ndp_id, app_info_len = app_info.len(), "datapath: request");
    }

    fn handle_data_path_confirm(
        &self,
        ndp_id: u32,
        peer_mac: MacAddr,
        accept: bool,
        reason: Option<ReasonCode>,
        app_info: Vec<u8>,
    ) {
        info!(ndp_id, %peer_mac, accept, ?reason, app_info_len = app_info.len(), "datapath: confirm");
    }

    fn handle_data_path_end(&self, ndp_id: u32) {
        info!(ndp_id, "datapath: end");
    }

    fn handle_data_path_timeout(&self, network_specifier: &str) {
        info!(network_specifier, "datapath: confirm timed out");
    }

    fn handle_nan_down(&self) {
        info!("datapath: nan_down");
    }
}

/// Priority: `--log-level`/`NAN_LOG_LEVEL` > `RUST_LOG` > `"info"`. Uses
/// `try_init` so it's safe to call more than once (e.g. from tests).
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("NAN_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format_enum() {
        Ok(nan_core::config::LogFormat::Json) => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);
    info!("nan-cored starting");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let (dispatcher, events) = Dispatcher::new(config.event_queue_capacity, shutdown);
    let hal = LoggingHal { events: events.clone() };
    let (mut manager, _handle) =
        NanStateManager::new(&config, events, Box::new(hal), Box::new(LoggingDataPathManager));

    dispatcher.run(&mut manager).await;
    info!("nan-cored stopped");
}
