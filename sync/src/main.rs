//! Till Sync demo - a scripted shift on a two-till storefront.
//!
//! Runs a clean sale, a degraded-mode park and recovery, and a storage
//! quota failure, logging what each till sees along the way.

use std::time::Duration;

use till_sync::{Storefront, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "till_sync=debug,till_vault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;

    tracing::info!(origin = %config.origin, "opening storefront");
    let shop = Storefront::new(config.clone());

    let front = shop.open("front-till");
    let back = shop.open("back-till");

    let _updates = back.on_update(|update| {
        tracing::info!(
            degraded = update.degraded,
            pending = update.pending_count,
            "back till sees new shared state"
        );
    });

    // A clean sale: written, announced, settled, retired.
    let sale = front.execute_transaction(12.50, "lunch special")?;
    tracing::info!(id = sale, "sale rung up on the front till");
    let full_flow = config.scramble_gate + config.settle_delay + Duration::from_millis(100);
    tokio::time::sleep(full_flow).await;
    tracing::info!(
        pending = back.pending_count(),
        record = front.sealed_record(sale).is_some(),
        "after the settle window"
    );

    // Degrade the storefront: the next sale parks behind the announcement.
    front.set_degraded(true);
    let parked = front.execute_transaction(7.00, "flat white")?;
    tokio::time::sleep(config.scramble_gate + Duration::from_millis(100)).await;
    tracing::info!(
        id = parked,
        pending = ?back.pending_ids(),
        "parked while the network is down"
    );

    // Recovery: the batch purge retires the backlog on every till.
    front.set_degraded(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(
        pending = back.pending_count(),
        record = front.sealed_record(parked).is_some(),
        "after recovery"
    );

    // Storage quota runs out mid-shift; the back till keeps selling from
    // memory and flags itself air-gapped.
    shop.medium().fail_writes_after(0);
    back.store().set("receipt_footer", "thank you, come again");
    tracing::info!(stats = ?back.stats(), "back till after the quota failure");

    front.close();
    back.close();

    Ok(())
}
