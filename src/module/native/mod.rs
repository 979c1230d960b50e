//! In-process reference modules
//!
//! Stand-ins for compiled chamber/simulation binaries so the host can run
//! and be tested without a browser. Their physics carries no contract.

pub mod counter;
pub mod simulation;

pub use counter::CounterChamber;
pub use simulation::NativeSimulation;

use std::future::Future;

use crate::chamber::Chamber;
use crate::error::HostResult;
use crate::registry::ChamberFactory;

/// Builds a fresh counter chamber for every populated grid slot
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterFactory;

impl ChamberFactory for CounterFactory {
    type Module = CounterChamber;

    fn instantiate(&self, id: usize) -> impl Future<Output = HostResult<Chamber<CounterChamber>>> {
        log::debug!("instantiating counter chamber {}", id);
        async move { Ok(Chamber::new(CounterChamber::new())) }
    }
}
