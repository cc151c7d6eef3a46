use std::sync::Arc;
use tauri::{Emitter, Manager};
use tracing::{error, info, warn};

mod commands;
mod database;
mod ipc;
mod models;
mod network;
mod remote;
mod sync;

use commands::*;
pub use crate::models::{QueueStats, QueuedRecord, RecordKind, SyncStatusResponse, SyncTally};
pub use crate::remote::{HttpEntityApi, RemoteEntityApi, RemoteError};
pub use crate::sync::{SyncConfig, SyncError, SyncManager};
pub use database::{storage_error_to_user_message, Database};
pub use network::check_online_status;


#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Инициализация логирования: по умолчанию info (если RUST_LOG не задан),
    // чтобы [SYNC]/[DB]/[NET] были видны
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    #[cfg(desktop)]
    let builder = tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, _args, _cwd| {
            // Focus existing window when user tries to launch second instance
            if let Some(win) = app.get_webview_window("main") {
                let _ = win.show();
                let _ = win.set_focus();
            }
        }))
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_notification::init())
        .plugin(tauri_plugin_process::init());
    #[cfg(not(desktop))]
    let builder = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_notification::init());

    builder
        .setup(|app| {
            #[cfg(desktop)]
            {
                #[cfg(target_os = "macos")]
                {
                    macos_app_nap::prevent();
                    info!("[MACOS] App Nap disabled — connectivity poller and sync keep running in background");
                }
                if let Err(e) = app.handle().plugin(tauri_plugin_updater::Builder::new().build()) {
                    warn!("[SETUP] Failed to load updater plugin (non-critical): {:?}", e);
                }
            }

            // Инициализация офлайн-очереди в setup hook
            let app_data_dir = app.path().app_data_dir().map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Failed to get app data directory: {}", e),
                )
            })?;
            std::fs::create_dir_all(&app_data_dir).map_err(|e| {
                let kind = e.kind();
                let msg = match kind {
                    std::io::ErrorKind::PermissionDenied => {
                        "Permission denied. Check app data directory is writable."
                    }
                    std::io::ErrorKind::StorageFull => "Disk full. Free space on drive.",
                    _ => "Failed to create app data directory.",
                };
                std::io::Error::new(
                    kind,
                    format!("{} Path: {} — {}", msg, app_data_dir.display(), e),
                )
            })?;

            let db_path = app_data_dir.join("spazafield.db");
            let db_path_str = db_path.to_str().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Database path contains invalid UTF-8: {}", db_path.display()),
                )
            })?;

            // Auto-recovery from corrupted DB: on integrity/corruption failure, backup and retry once
            let db = match Database::new(db_path_str) {
                Ok(d) => Arc::new(d),
                Err(e) => {
                    let err_str = e.to_string();
                    let is_corruption =
                        err_str.contains("corruption") || err_str.contains("integrity");
                    if !is_corruption || !db_path.exists() {
                        return Err(Box::new(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Failed to initialize offline storage: {}", e),
                        )));
                    }
                    let backup_path = app_data_dir.join(format!(
                        "spazafield.db.corrupted.{}",
                        chrono::Utc::now().timestamp()
                    ));
                    if let Err(rename_e) = std::fs::rename(&db_path, &backup_path) {
                        warn!(
                            "[DB] Failed to rename corrupted DB to {:?}: {}",
                            backup_path, rename_e
                        );
                        return Err(Box::new(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Offline storage corrupted and could not backup: {}", e),
                        )));
                    }
                    info!(
                        "[DB] Corrupted DB backed up to {:?}, starting fresh",
                        backup_path
                    );
                    let _ = app.handle().emit(crate::ipc::events::DB_RECOVERED, ());
                    Arc::new(Database::new(db_path_str).map_err(|e2| {
                        std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Failed to create fresh offline storage: {}", e2),
                        )
                    })?)
                }
            };

            // Инициализируем SyncManager (с app_version для X-App-Version header)
            let sync_config = SyncConfig {
                app_version: app.package_info().version.to_string(),
                ..Default::default()
            };
            let remote = Arc::new(HttpEntityApi::new(&sync_config));
            let poll_interval = sync_config.connectivity_poll_interval;
            let sync_manager = SyncManager::new_with_config(db, remote, sync_config);
            let sync_manager_bg = sync_manager.clone();
            app.manage(sync_manager);

            // Фоновый поток с выделенным runtime: поллер связности + цикл
            // координатора. В setup hook основной runtime ещё не готов.
            let app_handle = app.handle().clone();
            std::thread::spawn(move || {
                loop {
                    let rt = match tokio::runtime::Runtime::new() {
                        Ok(rt) => rt,
                        Err(e) => {
                            error!(
                                "[SYNC] CRITICAL: Failed to create Tokio runtime for sync coordinator: {}. Retrying in 10s...",
                                e
                            );
                            std::thread::sleep(std::time::Duration::from_secs(10));
                            continue;
                        }
                    };

                    rt.block_on(async {
                        // Startup jitter (1-3s): не бомбим API сервер при
                        // старте приложения или wake from sleep
                        let jitter_ms: u64 = rand::random::<u32>() as u64 % 2000 + 1000;
                        tokio::time::sleep(tokio::time::Duration::from_millis(jitter_ms)).await;

                        info!("[SYNC] Starting connectivity poller and sync coordinator");
                        let (tx, rx) = tokio::sync::watch::channel(false);
                        let poller = tokio::spawn(network::watch_connectivity(tx, poll_interval));

                        let handle = app_handle.clone();
                        sync_manager_bg
                            .run_event_loop(rx, move |status| {
                                let _ = handle.emit(ipc::events::SYNC_STATUS_UPDATE, status);
                            })
                            .await;
                        poller.abort();
                    });

                    // Цикл координатора живёт всю жизнь приложения; выход — аномалия
                    error!("[SYNC] Coordinator loop exited unexpectedly. Restarting in 10s...");
                    std::thread::sleep(std::time::Duration::from_secs(10));
                }
            });
            info!("[SYNC] Sync coordinator started in separate thread with dedicated runtime");

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Queue commands
            queue_record,
            list_pending_records,
            discard_record,
            clear_sync_queue,
            // Sync commands
            sync_now,
            get_sync_status,
            get_sync_queue_stats,
            // Misc
            show_notification,
            get_app_version
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
