// crates/server/src/keepalive.rs
//! Periodic self-ping of `/health`, so idle-sleeping hosts keep the server up
//! while long pipeline jobs run.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// URL of this server's own health endpoint as seen from localhost.
pub fn health_url(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    format!("http://{}/health", SocketAddr::new(ip, addr.port()))
}

/// Spawn the keep-alive loop. The first ping fires after one full `every`.
pub fn spawn_keep_alive(url: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Keep-alive disabled: HTTP client unavailable");
                return;
            }
        };

        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tracing::info!("Keep-alive ping");
            match client.get(&url).send().await {
                Ok(resp) => tracing::debug!(status = %resp.status(), "Keep-alive response"),
                Err(e) => tracing::debug!(error = %e, "Keep-alive request failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_health_url_rewrites_unspecified_host() {
        assert_eq!(
            health_url("0.0.0.0:8000".parse().unwrap()),
            "http://127.0.0.1:8000/health"
        );
        assert_eq!(
            health_url("[::]:8000".parse().unwrap()),
            "http://[::1]:8000/health"
        );
        assert_eq!(
            health_url("10.1.2.3:9000".parse().unwrap()),
            "http://10.1.2.3:9000/health"
        );
    }

    #[tokio::test]
    async fn test_pings_health_endpoint() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = axum::Router::new().route(
            "/health",
            axum::routing::get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let task = spawn_keep_alive(health_url(addr), Duration::from_millis(50));
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }
}
