use std::{
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
    time::Duration,
};

use svcctl::{
    error::ServiceError,
    health::{HealthProbe, HttpHealthProbe, wait_for_health},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

/// Minimal HTTP server answering every request with the current status code.
async fn spawn_server(status: Arc<AtomicU16>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind listener");
    let addr = listener.local_addr().expect("listener address");

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let code = status.load(Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {code} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}/health")
}

#[tokio::test]
async fn probe_reports_2xx_as_healthy() {
    let status = Arc::new(AtomicU16::new(200));
    let endpoint = spawn_server(status.clone()).await;
    let probe = HttpHealthProbe::new(endpoint.clone()).unwrap();

    assert_eq!(probe.endpoint(), endpoint);
    assert!(probe.is_healthy().await);

    status.store(204, Ordering::SeqCst);
    assert!(probe.is_healthy().await);
}

#[tokio::test]
async fn probe_reports_errors_as_unhealthy() {
    let status = Arc::new(AtomicU16::new(503));
    let endpoint = spawn_server(status.clone()).await;
    let probe = HttpHealthProbe::new(endpoint).unwrap();
    assert!(!probe.is_healthy().await);

    status.store(404, Ordering::SeqCst);
    assert!(!probe.is_healthy().await);
}

#[tokio::test]
async fn probe_reports_refused_connection_as_unhealthy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let probe = HttpHealthProbe::new(format!("http://{addr}/health")).unwrap();
    assert!(!probe.is_healthy().await);
}

#[tokio::test]
async fn probe_gives_up_on_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept connections but never answer.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let probe = HttpHealthProbe::with_timeout(
        format!("http://{addr}/health"),
        Duration::from_millis(200),
    )
    .unwrap();
    assert!(!probe.is_healthy().await);
}

#[tokio::test]
async fn polling_waits_for_server_to_recover() {
    let status = Arc::new(AtomicU16::new(503));
    let endpoint = spawn_server(status.clone()).await;
    let probe = HttpHealthProbe::new(endpoint).unwrap();

    let flip = status.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        flip.store(200, Ordering::SeqCst);
    });

    let elapsed = wait_for_health(
        &probe,
        true,
        Duration::from_millis(50),
        Duration::from_secs(5),
    )
    .await
    .expect("server should become healthy");
    assert!(elapsed >= Duration::from_millis(100));
}

#[tokio::test]
async fn polling_for_shutdown_times_out_against_live_server() {
    let status = Arc::new(AtomicU16::new(200));
    let endpoint = spawn_server(status).await;
    let probe = HttpHealthProbe::new(endpoint).unwrap();

    let err = wait_for_health(
        &probe,
        false,
        Duration::from_millis(20),
        Duration::from_millis(100),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::StopTimeout { .. }));
}
