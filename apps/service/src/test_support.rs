use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::database::DatabaseImpl;
use crate::pool::open_pool;

/// Fresh migrated database in a temporary directory. Keep the `TempDir` alive for the test.
pub async fn test_database() -> Result<(Arc<DatabaseImpl>, TempDir)> {
    let dir = tempfile::tempdir()?;
    let pool = open_pool(&dir.path().join("test.db"), 4).await?;

    let conn = pool.get().await.map_err(|e| anyhow::anyhow!("pool: {e}"))?;
    crate::database::initialize_database(&conn).await?;
    drop(conn);

    Ok((Arc::new(DatabaseImpl::new_from_pool(pool)), dir))
}

/// Minimal HTTP endpoint that records request bodies and answers with `status`
pub async fn webhook_endpoint(status: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request);
                    if let Some((head, body)) = text.split_once("\r\n\r\n") {
                        let length = head
                            .lines()
                            .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        if body.len() >= length {
                            break;
                        }
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
                let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    (format!("http://{addr}/hook"), rx)
}
