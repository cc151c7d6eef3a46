use crate::models::{RecordKind, SyncStatusResponse, SyncTally};
use crate::remote::RemoteEntityApi;
use crate::Database;
use chrono::Utc;
use scopeguard::guard;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Ошибки координатора (для разбора и логирования)
#[derive(Debug)]
pub enum SyncError {
    /// Локальное хранилище недоступно. Всплывает в UI как баннер;
    /// счётчики pass не трогает.
    Storage(String),
    Lock(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Storage(s) => write!(f, "Storage: {}", s),
            SyncError::Lock(s) => write!(f, "Lock: {}", s),
        }
    }
}

/// Конфигурация синхронизации (api_base_url, таймауты, интервалы координатора)
#[derive(Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
    /// Задержка после перехода offline→online до автозапуска pass.
    /// Debounce на нестабильной связи, не таймаут.
    pub settle_delay: Duration,
    /// Период обновления pending_count для UI. Сам по себе pass не запускает.
    pub refresh_interval: Duration,
    /// Период опроса связности фоновым поллером
    pub connectivity_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://app.spazafield.org/api".to_string(),
            http_timeout_secs: 120,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            settle_delay: Duration::from_secs(2),
            refresh_interval: Duration::from_secs(10),
            connectivity_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Координатор синхронизации: реплей офлайн-очереди против remote entity API.
/// Single-flight via AtomicBool — одновременно идёт не больше одного replay
/// pass; это обязательная замена Syncing-state guard на многопоточном runtime.
#[derive(Clone)]
pub struct SyncManager {
    pub(crate) db: Arc<Database>,
    pub(crate) remote: Arc<dyn RemoteEntityApi>,
    pub(crate) config: SyncConfig,
    /// Single-flight: prevents concurrent replay passes
    is_syncing: Arc<AtomicBool>,
    /// Связность подтверждена поллером. До подтверждения считаем offline.
    is_online: Arc<AtomicBool>,
    last_sync_at: Arc<Mutex<Option<i64>>>,
    last_tally: Arc<Mutex<SyncTally>>,
}

impl SyncManager {
    /// Convenience constructor; tests and external callers use this.
    #[allow(dead_code)]
    pub fn new(db: Arc<Database>, remote: Arc<dyn RemoteEntityApi>) -> Self {
        Self::new_with_config(db, remote, SyncConfig::default())
    }

    pub fn new_with_config(
        db: Arc<Database>,
        remote: Arc<dyn RemoteEntityApi>,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            remote,
            config,
            is_syncing: Arc::new(AtomicBool::new(false)),
            is_online: Arc::new(AtomicBool::new(false)),
            last_sync_at: Arc::new(Mutex::new(None)),
            last_tally: Arc::new(Mutex::new(SyncTally::default())),
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.is_online.store(online, Ordering::SeqCst);
    }

    /// Собрать статус для UI. pending_count всегда считается от очереди,
    /// не из кэшированного значения.
    pub fn status(&self) -> Result<SyncStatusResponse, String> {
        let pending_count = self
            .db
            .count_pending()
            .map_err(|e| format!("Failed to get pending count: {}", e))?;
        let last_sync_at = *self
            .last_sync_at
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        let tally = *self
            .last_tally
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;

        Ok(SyncStatusResponse {
            pending_count,
            is_online: self.is_online(),
            syncing: self.is_syncing(),
            last_sync_at,
            tally,
        })
    }

    fn store_tally(&self, tally: SyncTally) -> Result<(), SyncError> {
        let mut t = self
            .last_tally
            .lock()
            .map_err(|e| SyncError::Lock(e.to_string()))?;
        *t = tally;
        Ok(())
    }

    /// Запустить replay pass (обработать pending записи).
    /// Вход отклоняется (Ok(None)) если pass уже идёт или связность
    /// не подтверждена; отклонённый вход ничего не меняет.
    /// Panic guard: is_syncing is always reset via scopeguard, even on panic.
    pub async fn sync_queue(&self) -> Result<Option<SyncTally>, String> {
        if !self.is_online() {
            debug!("[SYNC] Replay pass not started: connectivity not confirmed");
            return Ok(None);
        }

        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[SYNC] Another replay pass already in progress, skipping");
            return Ok(None);
        }

        let _guard = guard((), |_| {
            self.is_syncing.store(false, Ordering::Release);
        });

        self.run_replay_internal()
            .await
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// Один replay pass: каждый вид в фиксированном порядке, снимок очереди
    /// на старте pass, старые записи первыми.
    async fn run_replay_internal(&self) -> Result<SyncTally, SyncError> {
        // Счётчики относятся только к текущему pass
        self.store_tally(SyncTally::default())?;
        let mut tally = SyncTally::default();

        for kind in RecordKind::REPLAY_ORDER {
            // Снимок на старте: записи, добавленные пока pass идёт,
            // попадут в следующий pass, не в этот
            let snapshot = self.db.list_pending(kind).map_err(|e| {
                SyncError::Storage(format!("list pending {}: {}", kind.as_str(), e))
            })?;
            if snapshot.is_empty() {
                continue;
            }

            info!(
                "[SYNC] Replaying {} pending {} record(s)",
                snapshot.len(),
                kind.as_str()
            );

            for record in snapshot {
                // Локальные поля (id, captured_at, synced) живут в своих
                // колонках — backend получает ровно то, что захватила форма
                match self
                    .remote
                    .create(kind, &record.payload, record.idempotency_key.as_deref())
                    .await
                {
                    Ok(_) => {
                        tally.success += 1;
                        if let Err(e) = self.db.remove(kind, record.id) {
                            // Remote-запись подтверждена, а локальное удаление
                            // не прошло: запись уйдёт повторно в следующем pass
                            // с тем же idempotency key
                            warn!(
                                "[SYNC] Record {} ({}) uploaded but not removed locally: {}. \
                                 It will be resubmitted with the same idempotency key.",
                                record.id,
                                kind.as_str(),
                                e
                            );
                        }
                    }
                    Err(e) => {
                        // Одна плохая запись не блокирует остальной batch;
                        // запись остаётся pending до следующего pass
                        warn!(
                            "[SYNC] Record {} ({}) failed: {} — stays pending",
                            record.id,
                            kind.as_str(),
                            e
                        );
                        tally.failed += 1;
                    }
                }
                self.store_tally(tally)?;
            }
        }

        {
            let mut last = self
                .last_sync_at
                .lock()
                .map_err(|e| SyncError::Lock(e.to_string()))?;
            *last = Some(Utc::now().timestamp());
        }

        let pending = self
            .db
            .count_pending()
            .map_err(|e| SyncError::Storage(format!("count pending: {}", e)))?;
        info!(
            "[SYNC] Replay pass complete: {} synced, {} failed, {} still pending",
            tally.success, tally.failed, pending
        );

        Ok(tally)
    }

    fn notify_status<F>(&self, notify: &F)
    where
        F: Fn(&SyncStatusResponse),
    {
        match self.status() {
            Ok(status) => notify(&status),
            Err(e) => warn!("[SYNC] Failed to assemble sync status: {}", e),
        }
    }

    fn pending_count_or_zero(&self) -> i64 {
        match self.db.count_pending() {
            Ok(count) => count,
            Err(e) => {
                warn!("[SYNC] Failed to read pending count: {}", e);
                0
            }
        }
    }

    /// Цикл координатора. Связность приходит только через переданный
    /// watch-канал (никаких глобальных слушателей), поэтому в тестах цикл
    /// кормится синтетическими переходами. Завершается при закрытии канала.
    ///
    /// Триггеры pass: переход offline→online при pending > 0 (после settle
    /// delay, отменяемого обратным переходом) и ручной sync_queue снаружи.
    /// Периодический refresh только обновляет статус.
    pub async fn run_event_loop<F>(&self, mut connectivity_rx: watch::Receiver<bool>, notify: F)
    where
        F: Fn(&SyncStatusResponse) + Send,
    {
        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut online = *connectivity_rx.borrow();
        self.set_online(online);

        // Сессия начинается офлайн: канал, стартующий в online, — это уже
        // переход, и pending записи со старта уходят после settle delay
        let mut scheduled: Option<tokio::time::Instant> = None;
        if online && self.pending_count_or_zero() > 0 {
            scheduled = Some(tokio::time::Instant::now() + self.config.settle_delay);
        }
        self.notify_status(&notify);

        loop {
            tokio::select! {
                changed = connectivity_rx.changed() => {
                    if changed.is_err() {
                        debug!("[SYNC] Connectivity channel closed, coordinator loop exiting");
                        break;
                    }
                    let was_online = online;
                    online = *connectivity_rx.borrow_and_update();
                    self.set_online(online);

                    if online && !was_online {
                        let pending = self.pending_count_or_zero();
                        if pending > 0 {
                            info!(
                                "[SYNC] Back online with {} pending record(s), replay in {:?}",
                                pending, self.config.settle_delay
                            );
                            scheduled =
                                Some(tokio::time::Instant::now() + self.config.settle_delay);
                        }
                    } else if !online && scheduled.take().is_some() {
                        info!("[SYNC] Connectivity lost during settle delay, scheduled replay abandoned");
                    }
                    self.notify_status(&notify);
                }
                _ = refresh.tick() => {
                    // Только обновление pending_count для UI, pass не запускается
                    self.notify_status(&notify);
                }
                _ = tokio::time::sleep_until(scheduled.unwrap_or_else(tokio::time::Instant::now)),
                        if scheduled.is_some() => {
                    scheduled = None;
                    match self.sync_queue().await {
                        Ok(Some(tally)) => info!(
                            "[SYNC] Auto replay pass finished: {} synced, {} failed",
                            tally.success, tally.failed
                        ),
                        Ok(None) => debug!("[SYNC] Auto replay skipped (offline or already syncing)"),
                        Err(e) => warn!("[SYNC] Auto replay failed: {}", e),
                    }
                    self.notify_status(&notify);
                }
            }
        }
    }
}
