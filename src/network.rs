use reqwest::Client;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

// Проверка online статуса через легковесный HTTP запрос
pub async fn check_online_status() -> bool {
    let client = match Client::builder().timeout(Duration::from_secs(2)).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    match client
        .get("https://www.cloudflare.com/cdn-cgi/trace")
        .timeout(Duration::from_secs(2))
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => {
            match client
                .get("https://www.google.com/generate_204")
                .timeout(Duration::from_secs(2))
                .send()
                .await
            {
                Ok(response) => response.status().is_success() || response.status().as_u16() == 204,
                Err(_) => false,
            }
        }
    }
}

/// Фоновый поллер связности: периодически пробует сеть и публикует
/// переходы online/offline в watch-канал. Завершается, когда все
/// получатели канала отпущены.
pub async fn watch_connectivity(tx: watch::Sender<bool>, poll_interval: Duration) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if tx.is_closed() {
            debug!("[NET] Connectivity watcher stopping: no receivers left");
            break;
        }

        let online = check_online_status().await;
        let changed = tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            info!(
                "[NET] Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }
}
