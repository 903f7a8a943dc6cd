/// Awaits `$operation` until it succeeds or the attempts run out, sleeping a linearly
/// growing delay between failures. Evaluates to `anyhow::Result`; the final error is
/// wrapped with the attempt count.
macro_rules! retry_db_operation {
    ($what:expr, $operation:expr) => {
        $crate::retry::retry_db_operation!($what, $operation, attempts = 3, backoff_secs = 2)
    };
    ($what:expr, $operation:expr, attempts = $attempts:expr, backoff_secs = $backoff:expr) => {{
        let what: String = $what.into();
        let attempts: u32 = $attempts;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match ($operation).await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{} succeeded on attempt {}", what, attempt);
                    }
                    break Ok(value);
                }
                Err(err) if attempt < attempts => {
                    let delay = std::time::Duration::from_secs($backoff * u64::from(attempt));
                    log::warn!(
                        "{} failed (attempt {} of {}): {:#}; retrying in {:?}",
                        what,
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    break Err(anyhow::Error::from(err)
                        .context(format!("{} failed after {} attempts", what, attempt)))
                }
            }
        }
    }};
}

pub(crate) use retry_db_operation;
