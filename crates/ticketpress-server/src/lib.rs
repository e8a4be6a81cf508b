// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ticketpress Server — HTTP ingress for print jobs and printer settings,
// wired to the durable queue and print worker from `ticketpress-print`.

pub mod routes;
pub mod services;

pub use routes::router;
pub use services::app_services::AppServices;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use ticketpress_core::AppConfig;
    use ticketpress_core::types::{JobId, JobStatus, PrinterSettingsUpdate};

    async fn post(app: &axum::Router, uri: &str, body: &str) -> StatusCode {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .expect("request");
        app.clone().oneshot(req).await.expect("response").status()
    }

    #[tokio::test]
    async fn submitted_ticket_reaches_the_printer() {
        let printer = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = printer.local_addr().expect("addr").port();
        let received = tokio::spawn(async move {
            let (mut socket, _) = printer.accept().await.expect("accept");
            let mut bytes = Vec::new();
            socket.read_to_end(&mut bytes).await.expect("read");
            bytes
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let services = AppServices::init(AppConfig {
            database_path: dir.path().join("jobs.db"),
            idle_interval_ms: 50,
            ..Default::default()
        })
        .expect("services");
        services
            .update_printer_settings(&PrinterSettingsUpdate {
                ip_address: Some("127.0.0.1".into()),
                port: Some(port),
                enabled: Some(true),
            })
            .expect("settings");

        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(services.print_worker().expect("worker").run(rx));

        let app = router(services.clone());
        let status = post(
            &app,
            "/api/print-jobs",
            r#"{"type":"receipt","content":{"text":"Table 9: 2 x Bun Cha"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let bytes = tokio::time::timeout(Duration::from_secs(5), received)
            .await
            .expect("printer received a ticket")
            .expect("printer task");
        assert_eq!(bytes, b"Table 9: 2 x Bun Cha\n\n\n\n");

        // The worker marks the job done right after the socket closes.
        let mut status = JobStatus::Printing;
        for _ in 0..100 {
            status = services.get_job(JobId(1)).unwrap().expect("stored").status;
            if status == JobStatus::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Done);

        tx.send(true).expect("shutdown");
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker stops")
            .expect("worker task");
    }
}
