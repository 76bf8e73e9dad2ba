use tokio::sync::watch;

/// Host-provided view of network reachability.
pub trait ConnectivityObserver: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that yields every online/offline change.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
