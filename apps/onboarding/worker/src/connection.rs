use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Connect to Redis and return a ConnectionManager
///
/// The connection is verified with a `PING` before it is handed out.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    Ok(manager)
}

/// Connect to Redis, retrying with exponential backoff.
///
/// Gives up after `max_attempts` and returns the last error.
pub async fn connect_with_retry(
    url: &str,
    max_attempts: u32,
    initial_delay: Duration,
) -> redis::RedisResult<ConnectionManager> {
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match connect(url).await {
            Ok(manager) => {
                info!(attempt, "Connected to Redis");
                return Ok(manager);
            }
            Err(e) if attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, delay_ms = delay.as_millis() as u64, "Redis connection failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
