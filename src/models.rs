use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Вид записи в офлайн-очереди. Определяет локальную коллекцию
/// и remote-сущность, в которую запись реплеится при синхронизации.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Shop,
    Inspection,
    Photo,
}

impl RecordKind {
    /// Фиксированный порядок обработки видов внутри одного replay pass
    pub const REPLAY_ORDER: [RecordKind; 3] =
        [RecordKind::Shop, RecordKind::Inspection, RecordKind::Photo];

    /// Имя remote-сущности (коллекция backend API)
    pub fn entity_name(&self) -> &'static str {
        match self {
            RecordKind::Shop => "Shop",
            RecordKind::Inspection => "Inspection",
            RecordKind::Photo => "Photo",
        }
    }

    /// Строковое представление для хранения в БД
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Shop => "shop",
            RecordKind::Inspection => "inspection",
            RecordKind::Photo => "photo",
        }
    }
}

/// Запись офлайн-очереди. `payload` хранится как захвачен формой и уходит
/// на backend без изменений; локальные поля живут в отдельных колонках.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedRecord {
    pub id: i64,
    pub kind: RecordKind,
    pub payload: serde_json::Value,
    pub captured_at: i64,
    pub synced: bool,
    /// Ключ идемпотентности для повторной отправки после неоднозначного сбоя.
    /// None только у строк, созданных до миграции 2.
    pub idempotency_key: Option<String>,
}

/// Счётчики одного replay pass (сбрасываются в начале каждого pass)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTally {
    pub success: i32,
    pub failed: i32,
}

/// Статус синхронизации для фронтенда
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusResponse {
    pub pending_count: i64,
    pub is_online: bool,
    pub syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    pub tally: SyncTally,
}

/// Статистика очереди по видам записей
#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub pending_count: i64,
    pub pending_by_kind: HashMap<String, i64>,
}
