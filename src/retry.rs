//! Reintentos acotados compartidos por el resolver y la capa de almacenamiento.
//!
//! Cada llamada tiene un número máximo de intentos explícito; nunca hay
//! bucles de reintento infinitos.

use std::{fmt::Display, future::Future, time::Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Multiplicador aplicado al delay tras cada fallo (1 = delay fijo).
    pub backoff: u32,
}

impl RetryPolicy {
    /// Delay fijo entre intentos.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: 1,
        }
    }

    /// Delay que se duplica después de cada fallo.
    pub const fn exponential(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: 2,
        }
    }

    /// Espera a aplicar después del intento fallido número `attempt` (base 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff.max(1).saturating_pow(attempt.saturating_sub(1));
        self.delay.saturating_mul(factor)
    }

    /// Reintenta cualquier error hasta agotar el presupuesto.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(label, op, |_| true).await
    }

    /// Reintenta sólo los errores que `is_transient` clasifica como transitorios.
    ///
    /// Devuelve el último error cuando se agotan los intentos o cuando el
    /// error no es transitorio.
    pub async fn run_if<T, E, F, Fut, P>(&self, label: &str, mut op: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("✅ {} exitoso en intento {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "🔄 {} falló (intento {}/{}): {} - reintentando en {:?}",
                        label, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if is_transient(&e) {
                        warn!("❌ {} agotó {} intentos: {}", label, max_attempts, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(500))
    }
}
