use crate::application::ports::ConnectivityObserver;
use crate::shared::config::ConnectivityConfig;
use crate::shared::error::AppError;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Connectivity inferred from a periodic health probe.
///
/// Any HTTP response counts as reachable; only transport failures flip the
/// state to offline.
pub struct ProbeConnectivity {
    state: watch::Sender<bool>,
    client: reqwest::Client,
    probe_url: String,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeConnectivity {
    pub fn new(config: &ConnectivityConfig) -> Result<Self, AppError> {
        let probe_url = config.probe_url.clone().ok_or_else(|| {
            AppError::Configuration("connectivity.probe_url is required for probing".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .map_err(|err| AppError::Configuration(err.to_string()))?;
        let (state, _) = watch::channel(true);

        Ok(Self {
            state,
            client,
            probe_url,
            interval: Duration::from_secs(config.probe_interval_secs.max(1)),
            task: Mutex::new(None),
        })
    }

    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.is_some() {
            return;
        }

        let state = self.state.clone();
        let client = self.client.clone();
        let url = self.probe_url.clone();
        let interval = self.interval;

        *task = Some(tokio::spawn(async move {
            loop {
                let online = probe_once(&client, &url).await;
                state.send_if_modified(|current| {
                    if *current == online {
                        false
                    } else {
                        debug!(online, url = %url, "probe changed connectivity");
                        *current = online;
                        true
                    }
                });
                tokio::time::sleep(interval).await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ProbeConnectivity {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_once(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => {
            if !response.status().is_success() {
                debug!(status = response.status().as_u16(), "probe target degraded");
            }
            true
        }
        Err(err) => {
            warn!(url, error = %err, "connectivity probe failed");
            false
        }
    }
}

impl ConnectivityObserver for ProbeConnectivity {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
