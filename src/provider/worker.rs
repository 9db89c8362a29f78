//! The serial worker task.
//!
//! One task per provider drains the command queue in order and applies each
//! command to the [`ProviderDriver`]. Shutdown is observed before queued
//! work, so a dropped provider stops promptly.

use log::info;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::{
    command::Command,
    counter::{self, ActiveProvider},
    driver::ProviderDriver,
};

enum Event {
    Shutdown,
    Command(Command),
    Drained,
}

/// Run `driver` until the provider is closed, dropped, or every command
/// sender is gone.
pub(super) async fn run(
    mut driver: ProviderDriver,
    mut commands: UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    peer: String,
) {
    let _counter = ActiveProvider::new();
    info!(
        "provider started: jmswire_providers_active={}, peer={peer}",
        counter::current_count()
    );

    if shutdown.is_cancelled() {
        info!("provider stopped before start: peer={peer}");
        driver.abandon();
        return;
    }

    loop {
        match next_event(&mut commands, &shutdown).await {
            Event::Command(command) => {
                if driver.handle(command).is_break() {
                    break;
                }
            }
            Event::Shutdown | Event::Drained => {
                driver.abandon();
                break;
            }
        }
    }

    info!("provider stopped: peer={peer}");
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus operations internally"
)]
async fn next_event(commands: &mut UnboundedReceiver<Command>, shutdown: &CancellationToken) -> Event {
    tokio::select! {
        biased;

        () = shutdown.cancelled() => Event::Shutdown,
        command = commands.recv() => command.map_or(Event::Drained, Event::Command),
    }
}
