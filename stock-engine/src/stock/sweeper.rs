//! Reservation Expiry Sweeper
//!
//! Recurring background task: finds cart reservations past their expiry,
//! releases the held stock through the mutation service and recomputes the
//! affected carts' totals. A reservation is claimed by marking its row
//! before the stock is restored, so concurrent ticks never double-release;
//! the row is only deleted once the release has landed, and a failed
//! release returns the claim so the next tick retries it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::PrimaryStore;
use crate::db::models::{MovementType, NewMovement};
use crate::error::StockResult;
use crate::stock::service::StockService;
use crate::utils::now_millis;

/// Must stay shorter than the minimum reservation TTL.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Counters from one sweep tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Reservations whose stock was restored.
    pub released: usize,
    /// Rows already claimed by a concurrent tick (no-ops).
    pub skipped: usize,
    /// Release attempts that failed; their claims were returned and the
    /// next sweep retries them.
    pub failed: usize,
    /// Distinct carts whose totals were recomputed.
    pub carts_recomputed: usize,
}

pub struct ReservationSweeper {
    primary: PrimaryStore,
    service: Arc<StockService>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ReservationSweeper {
    pub fn new(
        primary: PrimaryStore,
        service: Arc<StockService>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            primary,
            service,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Reservation sweeper started");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // skip immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reservation sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(outcome) if outcome.released > 0 || outcome.failed > 0 => {
                            tracing::info!(
                                released = outcome.released,
                                skipped = outcome.skipped,
                                failed = outcome.failed,
                                carts = outcome.carts_recomputed,
                                "Reservation sweep complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Reservation sweep failed: {e}"),
                    }
                }
            }
        }

        tracing::info!("Reservation sweeper stopped");
    }

    /// One sweep pass: release all expired reservations first, then
    /// recompute each affected cart's total once.
    pub async fn sweep(&self) -> StockResult<SweepOutcome> {
        let now = now_millis();
        let expired = self.primary.expired_reservations(now).await?;

        let mut outcome = SweepOutcome::default();
        let mut affected_carts: BTreeSet<i64> = BTreeSet::new();

        for reservation in expired {
            // Mark-claim first; a concurrent tick that lost the update
            // treats the reservation as already being released.
            match self.primary.claim_reservation(reservation.id).await {
                Ok(true) => {}
                Ok(false) => {
                    outcome.skipped += 1;
                    continue;
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        reservation_id = reservation.id,
                        error = %e,
                        "Failed to claim expired reservation, continuing"
                    );
                    continue;
                }
            }

            let mut release = NewMovement::new(
                reservation.product_id,
                reservation.quantity,
                MovementType::Release,
            )
            .with_reason("reservation expired")
            .with_reference(format!("cart:{}", reservation.cart_id));
            release.metadata.cart_id = Some(reservation.cart_id.to_string());

            match self.service.apply_delta(release).await {
                Ok(_) => {
                    outcome.released += 1;
                    affected_carts.insert(reservation.cart_id);
                    // Claimed rows are invisible to future sweeps, so a
                    // leftover row cannot double-release.
                    if let Err(e) = self.primary.delete_reservation(reservation.id).await {
                        tracing::warn!(
                            reservation_id = reservation.id,
                            error = %e,
                            "Failed to remove released reservation row"
                        );
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(
                        reservation_id = reservation.id,
                        product_id = reservation.product_id,
                        quantity = reservation.quantity,
                        error = %e,
                        "Failed to release expired reservation stock, returning claim"
                    );
                    // Put the row back in the sweep's view for retry.
                    if let Err(e) = self.primary.unclaim_reservation(reservation.id).await {
                        tracing::error!(
                            reservation_id = reservation.id,
                            error = %e,
                            "Failed to return reservation claim; release needs manual intervention"
                        );
                    }
                }
            }
        }

        for cart_id in affected_carts {
            match self.primary.recompute_cart_total(cart_id).await {
                Ok(_) => outcome.carts_recomputed += 1,
                Err(e) => {
                    tracing::warn!(cart_id, error = %e, "Failed to recompute cart total");
                }
            }
        }

        Ok(outcome)
    }
}
