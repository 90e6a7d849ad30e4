use std::collections::HashSet;

use crate::errors::{Result, SettingsError};
use crate::types::{ParleySettings, RetrySettings};

impl ParleySettings {
    /// Reject settings the service cannot run with. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.forward_timeout_ms == 0 {
            problems.push("server.forwardTimeoutMs must be > 0".to_string());
        }
        if self.server.max_send_queue == 0 {
            problems.push("server.maxSendQueue must be > 0".to_string());
        }
        if self.store.pool_size == 0 {
            problems.push("store.poolSize must be > 0".to_string());
        }
        if self.store.db_path.trim().is_empty() {
            problems.push("store.dbPath must not be empty".to_string());
        }
        check_retry("store.retry", &self.store.retry, &mut problems);
        check_retry("generator.retry", &self.generator.retry, &mut problems);

        if self.conversation.session_expiry_hours == 0 {
            problems.push("conversation.sessionExpiryHours must be > 0".to_string());
        }
        if self.conversation.chunk_idle_timeout_secs == 0 {
            problems.push("conversation.chunkIdleTimeoutSecs must be > 0".to_string());
        }
        if self.generator.circuit_breaker_threshold == 0 {
            problems.push("generator.circuitBreakerThreshold must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            problems.push("generator.temperature must be within 0..=2".to_string());
        }

        let responders = &self.responders;
        if responders.descriptors.is_empty() {
            problems.push("responders.descriptors must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for d in &responders.descriptors {
            if d.id.trim().is_empty() {
                problems.push("responder id must not be empty".to_string());
                continue;
            }
            if !seen.insert(d.id.as_str()) {
                problems.push(format!("duplicate responder id: {}", d.id));
            }
            if d.timeout_secs == 0 {
                problems.push(format!("responder {}: timeoutSecs must be > 0", d.id));
            }
            if d.keywords.iter().any(|k| k.trim().is_empty()) {
                problems.push(format!("responder {}: keywords must not be blank", d.id));
            }
        }
        if responders.find(&responders.default_responder).is_none() {
            problems.push(format!(
                "default responder {:?} has no descriptor",
                responders.default_responder
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::InvalidValue(problems.join("; ")))
        }
    }
}

fn check_retry(section: &str, retry: &RetrySettings, problems: &mut Vec<String>) {
    if retry.max_attempts == 0 {
        problems.push(format!("{section}.maxAttempts must be >= 1"));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        problems.push(format!("{section}.maxDelayMs must be >= baseDelayMs"));
    }
}
