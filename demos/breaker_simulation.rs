//! Circuit Breaker Simulation
//!
//! Drives a flaky dependency through a registry-managed breaker and prints
//! what the caller sees on every call, followed by the breaker's stats.
//!
//! Run with `RUST_LOG=tripwire_core=debug` to see transitions as they happen.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tripwire_core::{BreakerError, CircuitBreakerRegistry, RegistryConfig};

const SETTINGS: &str = r#"
[defaults]
failure_threshold = 5
recovery_timeout = "30s"

[breakers.speech]
failure_threshold = 3
recovery_timeout = "300ms"
success_threshold = 2
call_timeout = "100ms"
"#;

#[derive(Debug, thiserror::Error)]
enum SpeechError {
    #[error("speech backend returned 503")]
    Unavailable,
}

/// Fails for the first few calls, hangs once, then recovers
async fn synthesize(attempt: u32) -> Result<String, SpeechError> {
    match attempt {
        0..=2 => Err(SpeechError::Unavailable),
        3 => {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok("late".to_string())
        }
        _ => Ok(format!("audio-{attempt}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let registry = CircuitBreakerRegistry::with_config(RegistryConfig::from_toml_str(SETTINGS)?);
    let breaker = registry.get("speech");
    let attempts = Arc::new(AtomicU32::new(0));

    for round in 0..10 {
        let attempts = Arc::clone(&attempts);
        let result = breaker
            .execute(|| async move { synthesize(attempts.fetch_add(1, Ordering::SeqCst)).await })
            .await;

        match result {
            Ok(audio) => println!("call {round:>2}: ok ({audio})"),
            Err(BreakerError::Open(e)) => {
                println!("call {round:>2}: rejected, retry in {:?}", e.remaining);
                tokio::time::sleep(e.remaining).await;
            }
            Err(BreakerError::Timeout(e)) => {
                println!("call {round:>2}: timed out after {:?}", e.timeout)
            }
            Err(BreakerError::Abandoned(e)) => println!("call {round:>2}: abandoned ({e})"),
            Err(BreakerError::Operation(e)) => println!("call {round:>2}: failed ({e})"),
        }
        println!("         state = {}", breaker.state());

        if round == 3 {
            // Outlast the recovery window so the next call probes
            tokio::time::sleep(Duration::from_millis(350)).await;
        }
    }

    println!("{}", serde_json::to_string_pretty(&registry.get_all_stats())?);
    Ok(())
}
