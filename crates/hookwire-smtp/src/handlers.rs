//! Built-in handlers.

use std::sync::Arc;

use hookwire_core::{Capability, ExtensionPoints, Handler, WiringError};

use crate::types::extension::{EIGHT_BIT_MIME, ENHANCED_STATUS_CODES, PIPELINING};

/// Advertises EHLO/LHLO keywords without registering hooks.
///
/// The engine already pipelines, so offering `PIPELINING` needs nothing
/// beyond the keyword.
#[derive(Debug, Clone)]
pub struct Extensions {
    capabilities: Vec<Capability>,
}

impl Extensions {
    /// Advertises the given keywords.
    #[must_use]
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// `PIPELINING`, `8BITMIME` and `ENHANCEDSTATUSCODES`.
    #[must_use]
    pub fn standard() -> Self {
        Self::new([PIPELINING, EIGHT_BIT_MIME, ENHANCED_STATUS_CODES])
    }
}

impl Handler for Extensions {
    fn name(&self) -> &str {
        "extensions"
    }

    fn provides(&self) -> &[Capability] {
        &self.capabilities
    }

    fn register(self: Arc<Self>, _points: &mut ExtensionPoints) -> Result<(), WiringError> {
        Ok(())
    }
}
