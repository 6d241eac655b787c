//! Toggle event emitter (queue producer side).
//!
//! Serializes a [`CertToggleEvent`] and publishes it through a [`Publisher`].
//! Delivery is best-effort: the store mutation that preceded the emit is not
//! rolled back when publishing fails.

use certflow_core::DeliveryPolicy;
use certflow_core::event::CertToggleEvent;
use certflow_core::queue::{Publisher, QueueError};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("Failed to serialize toggle event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to publish toggle event after {attempts} attempt(s): {source}")]
    Delivery {
        attempts: u32,
        #[source]
        source: QueueError,
    },
}

/// Publishes certificate toggle events.
pub struct ToggleEmitter<P> {
    publisher: P,
    policy: DeliveryPolicy,
}

impl<P: Publisher> ToggleEmitter<P> {
    pub const fn new(publisher: P, policy: DeliveryPolicy) -> Self {
        Self { publisher, policy }
    }

    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Publish `{cert_uuid, active, now}`.
    ///
    /// Retries only as far as the configured [`DeliveryPolicy`] allows; the
    /// default makes a single attempt. Every attempt carries the same event,
    /// so the timestamp reflects the state change, not the retry.
    pub async fn emit_toggle(
        &self,
        cert_uuid: &str,
        active: bool,
    ) -> Result<CertToggleEvent, EmitError> {
        let event = CertToggleEvent::now(cert_uuid, active);
        let payload = event.to_json()?;

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.publisher.publish(&payload).await {
                Ok(offset) => {
                    debug!(cert_uuid, active, offset, attempts, "Toggle event published");
                    return Ok(event);
                }
                Err(source) if self.policy.should_retry(attempts) => {
                    let delay = self.policy.delay_for_attempt(attempts - 1);
                    warn!(
                        cert_uuid,
                        attempts,
                        delay_ms = delay.as_millis(),
                        error = %source,
                        "Toggle event publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    warn!(cert_uuid, attempts, error = %source, "Toggle event not delivered");
                    return Err(EmitError::Delivery { attempts, source });
                }
            }
        }
    }
}
