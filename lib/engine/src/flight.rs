//! The interface for exposing an engine over Arrow Flight.
//!
//! The RPC layer is an external collaborator; this crate only defines the
//! contract it implements against the engine facade.

use crate::{ChrontextError, Engine};
use async_trait::async_trait;
use std::sync::Arc;

/// Serves an [Engine] over Arrow Flight on the given bind address.
#[async_trait]
pub trait FlightServable: Send + Sync {
    async fn serve(
        &self,
        engine: Arc<Engine>,
        bind_address: &str,
    ) -> Result<(), ChrontextError>;
}
