use rusqlite::{params, Connection, Result as SqliteResult};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::models::{QueueStats, QueuedRecord, RecordKind};
use chrono::Utc;
use rusqlite::Error::InvalidParameterName;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation — caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check app data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check app data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// Convert rusqlite errors from `append` to user-friendly messages for the capture form.
/// A failed local save is a distinct condition from a failed sync: the form data was
/// never queued and the user must retry or abandon it.
pub fn storage_error_to_user_message(e: &rusqlite::Error) -> String {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => "Offline storage unavailable (Disk Full?)".to_string(),
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                "Offline storage unavailable (Permission denied?)".to_string()
            }
            ErrorCode::SystemIoFailure => "Offline storage unavailable (I/O error?)".to_string(),
            _ => format!("Failed to save record locally: {}", e),
        }
    } else {
        format!("Failed to save record locally: {}", e)
    }
}

/// Локальная офлайн-очередь: записи, захваченные без связи с backend,
/// до подтверждённой отправки. Одна логическая коллекция на вид записи.
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock. \
                 Please restart the application to recover.",
                e
            ))
        })
    }

    /// Открыть (создав при отсутствии) локальное хранилище. Идемпотентно:
    /// повторное открытие того же файла прогоняет миграции как no-op.
    pub fn new(db_path: &str) -> SqliteResult<Self> {
        // pragma_update требует &mut self, поэтому нужен mut
        #[allow(unused_mut)]
        let mut conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup — detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        // WAL: защита от partial writes при внезапном завершении
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();

        // PERFORMANCE: Reduce disk I/O during sync bursts (safe with WAL)
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 2;

    /// Versioned migrations using SQLite user_version pragma.
    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            // AUTOINCREMENT: локальные id монотонны и не переиспользуются после удаления
            conn.execute(
                "CREATE TABLE IF NOT EXISTS pending_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                captured_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_pending_records_kind
                 ON pending_records(kind, synced)",
                [],
            )?;
        }

        // Migration 2: idempotency_key (idempotent ALTER)
        if current < 2 {
            let _ = conn.execute(
                "ALTER TABLE pending_records ADD COLUMN idempotency_key TEXT",
                [],
            );
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Добавить запись в очередь. Не трогает сеть; работает полностью офлайн.
    /// Возвращает присвоенный локальный id.
    pub fn append(&self, kind: RecordKind, payload: &serde_json::Value) -> SqliteResult<i64> {
        let payload_str = serde_json::to_string(payload)
            .map_err(|e| InvalidParameterName(format!("Failed to serialize payload: {}", e)))?;
        let captured_at = Utc::now().timestamp();

        // Ключ идемпотентности: вид + payload + случайная соль. Соль нужна,
        // чтобы два одинаковых захвата остались разными записями на сервере.
        let mut hasher = DefaultHasher::new();
        kind.as_str().hash(&mut hasher);
        payload_str.hash(&mut hasher);
        rand::random::<u64>().hash(&mut hasher);
        let idempotency_key = format!("{}-{:x}", kind.as_str(), hasher.finish());

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pending_records (kind, payload, captured_at, synced, idempotency_key)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![kind.as_str(), payload_str, captured_at, idempotency_key],
        )
        .map_err(|e| {
            log_io_error_if_any("append", &e);
            error!("[DB] Failed to append {} record: {}", kind.as_str(), e);
            e
        })?;

        Ok(conn.last_insert_rowid())
    }

    /// Все несинхронизированные записи вида, в порядке вставки (старые первыми).
    /// Снимок на момент вызова; состояние не меняет.
    pub fn list_pending(&self, kind: RecordKind) -> SqliteResult<Vec<QueuedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, payload, captured_at, synced, idempotency_key
             FROM pending_records
             WHERE kind = ?1 AND synced = 0
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, payload_str, captured_at, synced, idempotency_key) = row?;
            match serde_json::from_str(&payload_str) {
                Ok(payload) => result.push(QueuedRecord {
                    id,
                    kind,
                    payload,
                    captured_at,
                    synced: synced != 0,
                    idempotency_key,
                }),
                Err(e) => {
                    // Одна битая запись не должна блокировать очередь
                    warn!(
                        "[DB] Skipping record {}: payload is not valid JSON ({})",
                        id, e
                    );
                }
            }
        }

        Ok(result)
    }

    /// Пометить запись синхронизированной. Идемпотентно: отсутствующий id — no-op.
    pub fn mark_synced(&self, kind: RecordKind, id: i64) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pending_records SET synced = 1 WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        Ok(())
    }

    /// Удалить запись. Идемпотентно: отсутствующий id — no-op.
    pub fn remove(&self, kind: RecordKind, id: i64) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM pending_records WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        Ok(())
    }

    /// Количество pending записей по всем видам.
    /// Всегда считается от хранилища, не из отдельного счётчика.
    pub fn count_pending(&self) -> SqliteResult<i64> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_records WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Статистика очереди по видам записей
    pub fn queue_stats(&self) -> SqliteResult<QueueStats> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) as count
             FROM pending_records
             WHERE synced = 0
             GROUP BY kind",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut by_kind: HashMap<String, i64> = HashMap::new();
        let mut total = 0;
        for row in rows {
            let (kind, count) = row?;
            total += count;
            by_kind.insert(kind, count);
        }

        Ok(QueueStats {
            pending_count: total,
            pending_by_kind: by_kind,
        })
    }

    /// Очистить всю очередь (safety valve для пользователей)
    pub fn clear_queue(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM pending_records", [])?;
        Ok(())
    }
}
