use crate::database::storage_error_to_user_message;
use crate::models::{QueueStats, QueuedRecord, RecordKind, SyncStatusResponse, SyncTally};
use crate::sync::SyncManager;
use tauri::{AppHandle, Manager, State};
use tracing::{info, warn};

// ============================================
// TAURI COMMANDS для офлайн-очереди
// ============================================

/// Поставить захваченную форму в офлайн-очередь. Сети не касается и обязана
/// работать полностью офлайн; при отказе локального хранилища форма остаётся
/// у вызывающего — он решает, повторить или бросить.
#[tauri::command]
pub async fn queue_record(
    kind: RecordKind,
    payload: serde_json::Value,
    sync_manager: State<'_, SyncManager>,
) -> Result<i64, String> {
    let id = sync_manager.db.append(kind, &payload).map_err(|e| {
        warn!("[QUEUE] Failed to queue {} record: {}", kind.as_str(), e);
        storage_error_to_user_message(&e)
    })?;

    info!(
        "[QUEUE] {} record queued with local id {}",
        kind.entity_name(),
        id
    );
    Ok(id)
}

/// Список pending записей вида (для экрана очереди)
#[tauri::command]
pub async fn list_pending_records(
    kind: RecordKind,
    sync_manager: State<'_, SyncManager>,
) -> Result<Vec<QueuedRecord>, String> {
    sync_manager
        .db
        .list_pending(kind)
        .map_err(|e| format!("Failed to list pending records: {}", e))
}

/// Выбросить запись из очереди, не отправляя (пользователь передумал).
/// Идемпотентно: повторный вызов или отсутствующий id — no-op.
#[tauri::command]
pub async fn discard_record(
    kind: RecordKind,
    id: i64,
    sync_manager: State<'_, SyncManager>,
) -> Result<(), String> {
    sync_manager
        .db
        .remove(kind, id)
        .map_err(|e| format!("Failed to discard record: {}", e))?;
    info!("[QUEUE] Record {} ({}) discarded", id, kind.as_str());
    Ok(())
}

/// Очистить всю очередь синхронизации (safety valve для пользователей)
#[tauri::command]
pub async fn clear_sync_queue(sync_manager: State<'_, SyncManager>) -> Result<(), String> {
    sync_manager
        .db
        .clear_queue()
        .map_err(|e| format!("Failed to clear queue: {}", e))?;
    warn!("[QUEUE] Sync queue cleared by user");
    Ok(())
}

// ============================================
// TAURI COMMANDS для синхронизации
// ============================================

/// Ручной запуск replay pass ("Sync Now"). None — pass не стартовал
/// (офлайн или уже идёт).
#[tauri::command]
pub async fn sync_now(sync_manager: State<'_, SyncManager>) -> Result<Option<SyncTally>, String> {
    sync_manager.sync_queue().await
}

/// Статус синхронизации (pending count, связность, последний pass)
#[tauri::command]
pub async fn get_sync_status(
    sync_manager: State<'_, SyncManager>,
) -> Result<SyncStatusResponse, String> {
    sync_manager.status()
}

/// Детальная статистика очереди по видам записей
#[tauri::command]
pub async fn get_sync_queue_stats(
    sync_manager: State<'_, SyncManager>,
) -> Result<QueueStats, String> {
    sync_manager
        .db
        .queue_stats()
        .map_err(|e| format!("Failed to get queue stats: {}", e))
}

// ============================================
// Прочие команды приложения
// ============================================

#[tauri::command]
pub async fn show_notification(title: String, body: String, app: AppHandle) -> Result<(), String> {
    use tauri_plugin_notification::NotificationExt;

    app.notification()
        .builder()
        .title(title)
        .body(body)
        .show()
        .map_err(|e| format!("Failed to show notification: {:?}", e))?;

    Ok(())
}

#[tauri::command]
pub async fn get_app_version(app: AppHandle) -> Result<String, String> {
    Ok(app.package_info().version.to_string())
}
