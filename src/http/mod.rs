use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{Router, extract::DefaultBodyLimit, middleware};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use http::StatusCode;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info};

use crate::{
    config::SettingHost,
    consts::MAX_BODY_SIZE,
    middlewares::{add_version, logging_route},
    worker::Registration,
};

pub mod error;
// worker fetch hook
pub mod intercept;

/// Shared by every request handler of every host
#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<Registration>,
}

/// Build the router for one host, every path goes through the worker
pub fn make_router(registration: Arc<Registration>, timeout: u16) -> Router {
    let state = AppState { registration };

    let router = Router::new()
        .fallback(intercept::intercept)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(add_version))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Duration::from_secs(timeout.into()),
                )),
        );

    logging_route(router)
}

/// 优雅关闭所有服务器
///
/// 对所有运行中的服务器发送优雅关闭信号，并清空服务器句柄列表。
/// 服务器将在 30 秒内完成正在处理的请求后停止。
pub async fn shutdown_servers(handles: &mut Vec<Handle<SocketAddr>>) {
    for handle in handles.iter() {
        handle.graceful_shutdown(Some(Duration::from_secs(30)));
    }
    handles.clear();
    info!("All servers have been signaled to shut down");
}

/// 启动所有服务器
///
/// 单个服务器启动失败会被记录为错误日志，不会影响其他服务器的启动
pub async fn start_servers(
    hosts: Vec<SettingHost>,
    registration: Arc<Registration>,
) -> Vec<Handle<SocketAddr>> {
    let mut handles = Vec::new();
    for host in hosts {
        let server_addr = format!("{}:{}", host.ip, host.port);
        match make_server(host, registration.clone()).await {
            Ok(handle) => {
                handles.push(handle);
                info!("Server instance started on {}", server_addr);
            }
            Err(e) => {
                error!(
                    "Failed to start server instance on {}: {:?}",
                    server_addr, e
                );
            }
        }
    }
    handles
}

pub async fn make_server(
    host: SettingHost,
    registration: Arc<Registration>,
) -> anyhow::Result<Handle<SocketAddr>> {
    debug!("make_server start with host: {:?}", host);
    let router = make_router(registration, host.timeout);

    let SettingHost {
        ip,
        port,
        ssl,
        certificate,
        certificate_key,
        ..
    } = host;
    let addr: SocketAddr = format!("{}:{}", ip, port).parse()?;

    let tls = if ssl {
        let (Some(cert), Some(key)) = (certificate, certificate_key) else {
            return Err(anyhow!("SSL enabled but certificate or key missing"));
        };
        debug!("Certificate: {} Certificate key: {}", cert, key);
        Some(RustlsConfig::from_pem_file(&cert, &key).await?)
    } else {
        None
    };

    let handle = Handle::new();
    let handle_clone = handle.clone();

    // 生成一个任务来运行服务器
    tokio::spawn(async move {
        let served = match tls {
            Some(rustls_config) => {
                info!("Listening on https://{}", addr);
                axum_server::bind_rustls(addr, rustls_config)
                    .handle(handle_clone)
                    .serve(router.into_make_service())
                    .await
            }
            None => {
                info!("Listening on http://{}", addr);
                axum_server::bind(addr)
                    .handle(handle_clone)
                    .serve(router.into_make_service())
                    .await
            }
        };
        if let Err(err) = served {
            error!("Server on {} stopped: {:?}", addr, err);
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::HttpNetwork;

    #[tokio::test]
    async fn test_make_server_binds_ephemeral_port() {
        let network = HttpNetwork::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let registration = Arc::new(Registration::new(Arc::new(network)));
        let host = SettingHost {
            ip: "127.0.0.1".to_string(),
            port: 0,
            ssl: false,
            certificate: None,
            certificate_key: None,
            timeout: 5,
        };

        let handle = make_server(host, registration).await.unwrap();
        let addr = handle.listening().await.unwrap();
        assert_ne!(addr.port(), 0);

        let mut handles = vec![handle];
        shutdown_servers(&mut handles).await;
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn test_make_server_rejects_ssl_without_certificate() {
        let network = HttpNetwork::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let registration = Arc::new(Registration::new(Arc::new(network)));
        let host = SettingHost {
            ip: "127.0.0.1".to_string(),
            port: 0,
            ssl: true,
            certificate: None,
            certificate_key: None,
            timeout: 5,
        };

        assert!(make_server(host, registration).await.is_err());
    }
}
