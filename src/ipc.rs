//! Centralized IPC event names.
//! Prevents typos and enables type-safe references across Rust and the frontend.

/// Tauri event names (Rust emit ↔ Frontend listen)
pub mod events {
    /// Payload: SyncStatusResponse. Emitted on connectivity transitions,
    /// after each replay pass and on every periodic refresh.
    pub const SYNC_STATUS_UPDATE: &str = "sync-status-update";
    pub const DB_RECOVERED: &str = "db-recovered-from-corruption";
}
